// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Network math for project SDN provisioning
//!
//! Pure helpers, no I/O:
//! - CIDR and gateway validation
//! - DHCP range placement inside a subnet
//! - Proxmox SDN identifiers derived from a project

use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr};

/// Smallest DHCP block (and smallest start offset) handed out, in addresses
const DHCP_MIN_BLOCK: u64 = 10;

/// Parse "address/prefix" into its parts. Works for IPv4 and IPv6.
fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8), String> {
    let (addr, prefix) = cidr.trim().split_once('/')
        .ok_or_else(|| format!("'{}' is not in address/prefix form", cidr))?;
    let addr: IpAddr = addr.parse()
        .map_err(|e| format!("Invalid address in '{}': {}", cidr, e))?;
    let prefix: u8 = prefix.parse()
        .map_err(|e| format!("Invalid prefix length in '{}': {}", cidr, e))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("Prefix length /{} is too long in '{}'", prefix, cidr));
    }
    Ok((addr, prefix))
}

/// Host-bit mask for a prefix, as the low bits of a u128
fn host_bits(prefix: u8, width: u8) -> u128 {
    let host = (width - prefix) as u32;
    if host == 0 { 0 } else { u128::MAX >> (128 - host) }
}

fn addr_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(a) => (u32::from(a) as u128, 32),
        IpAddr::V6(a) => (u128::from(a), 128),
    }
}

/// True only when `cidr` names an IPv4 network address, e.g. 10.0.1.0/24 (not 10.0.1.5/24)
pub fn is_valid_cidr(cidr: &str) -> bool {
    if cidr.trim().is_empty() {
        return false;
    }
    match parse_cidr(cidr) {
        Ok((addr @ IpAddr::V4(_), prefix)) => {
            let (bits, width) = addr_bits(addr);
            bits & host_bits(prefix, width) == 0
        }
        _ => false,
    }
}

/// Check that `gateway` is a usable host address inside `subnet`.
/// Broadcast is only checked for IPv4.
pub fn validate_gateway_in_subnet(subnet: &str, gateway: &str) -> Result<(), String> {
    if subnet.trim().is_empty() {
        return Err("Subnet is required".to_string());
    }
    if gateway.trim().is_empty() {
        return Err("Gateway is required".to_string());
    }
    let (net_addr, prefix) = parse_cidr(subnet)?;
    let gw: IpAddr = gateway.trim().parse()
        .map_err(|e| format!("Invalid gateway '{}': {}", gateway, e))?;
    if gw.is_ipv4() != net_addr.is_ipv4() {
        return Err(format!("Gateway {} and subnet {} are different address families", gateway, subnet));
    }

    let (net_bits, width) = addr_bits(net_addr);
    let (gw_bits, _) = addr_bits(gw);
    let host = host_bits(prefix, width);
    let network = net_bits & !host;

    if gw_bits & !host != network {
        return Err(format!("Gateway {} is not inside subnet {}", gateway, subnet));
    }
    if gw_bits == network {
        return Err(format!("Gateway {} cannot be the network address of {}", gateway, subnet));
    }
    if width == 32 && gw_bits == network | host {
        return Err(format!("Gateway {} cannot be the broadcast address of {}", gateway, subnet));
    }
    Ok(())
}

/// Place a DHCP pool in the upper part of an IPv4 subnet, clear of the gateway.
///
/// The pool is 40% of the usable hosts (at least 10, at most all of them),
/// starting 60% of the way in (at least offset 10). If that overruns the
/// last usable host it is slid back to end there. When the gateway lands
/// inside the pool the pool keeps the larger side of it.
///
/// Returns the Proxmox form `start-address=<ip>,end-address=<ip>`.
pub fn calculate_dhcp_range(subnet: &str, gateway: &str) -> Result<String, String> {
    let (addr, prefix) = parse_cidr(subnet)?;
    let addr = match addr {
        IpAddr::V4(a) => a,
        IpAddr::V6(_) => return Err(format!("DHCP range calculation only supports IPv4, got {}", subnet)),
    };

    let host_count = 1u64 << (32 - prefix as u32);
    if host_count < 4 {
        return Err(format!("Subnet {} is too small for a DHCP range", subnet));
    }
    let usable = host_count - 2;
    let network = u32::from(addr) as u64 & !(host_count - 1);

    let size = (usable * 40 / 100).max(DHCP_MIN_BLOCK).min(usable);
    let mut offset = (usable * 60 / 100).max(DHCP_MIN_BLOCK);
    if offset + size - 1 > usable {
        offset = (usable + 1).saturating_sub(size).max(1);
    }
    let mut start = offset;
    let mut end = offset + size - 1;

    // Keep the pool off the gateway
    if let Ok(gw) = gateway.trim().parse::<Ipv4Addr>() {
        let gw_off = (u32::from(gw) as u64).wrapping_sub(network);
        if gw_off >= start && gw_off <= end {
            if end - gw_off >= gw_off - start {
                start = gw_off + 1;
            } else {
                end = gw_off - 1;
            }
        }
    }
    if start >= end {
        return Err(format!("Subnet {} is too small for a DHCP range beside gateway {}", subnet, gateway));
    }

    let start_ip = Ipv4Addr::from((network + start) as u32);
    let end_ip = Ipv4Addr::from((network + end) as u32);
    Ok(format!("start-address={},end-address={}", start_ip, end_ip))
}

/// Split `start-address=a,end-address=b` back into (a, b)
pub fn parse_dhcp_range(range: &str) -> Result<(String, String), String> {
    let mut start = None;
    let mut end = None;
    for part in range.split(',') {
        if let Some((key, value)) = part.split_once('=') {
            match key.trim() {
                "start-address" => start = Some(value.trim().to_string()),
                "end-address" => end = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    match (start, end) {
        (Some(s), Some(e)) => Ok((s, e)),
        (None, _) => Err(format!("DHCP range '{}' has no start-address", range)),
        (_, None) => Err(format!("DHCP range '{}' has no end-address", range)),
    }
}

/// Zone/VNet name for a project: "prj" + 5 hex chars.
/// Proxmox caps SDN ids at 8 characters.
pub fn generate_sdn_identifier(project_id: &str, project_name: &str) -> String {
    if project_id.len() >= 5 && project_id.is_char_boundary(5) {
        return format!("prj{}", &project_id[..5]);
    }
    let digest = hex::encode(Sha256::digest(project_name.as_bytes()));
    format!("prj{}", &digest[..5])
}

/// Proxmox subnet id inside a zone: "<zone>-<network>-<prefix>"
pub fn sdn_subnet_id(zone: &str, cidr: &str) -> String {
    let (net, prefix) = cidr.split_once('/').unwrap_or((cidr, ""));
    format!("{}-{}-{}", zone, net.trim(), prefix.trim())
}
