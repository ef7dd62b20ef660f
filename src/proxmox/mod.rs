// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::projects::orchestrator::{ContainerLister, NetworkApi};

/// Proxmox VE API client for one PVE node
pub struct PveClient {
    base_url: String,
    token: String,
    node_name: String,
    client: reqwest::Client,
}

/// An LXC container on a Proxmox node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PveGuest {
    pub vmid: u64,
    pub name: String,
    pub status: String,        // "running", "stopped"
    pub cpus: u32,
    pub cpu: f32,              // 0.0–1.0 fraction of allocated CPUs
    pub maxmem: u64,           // bytes
    pub mem: u64,              // current usage bytes
    pub maxdisk: u64,          // bytes
    pub disk: u64,             // current usage bytes
    pub uptime: u64,           // seconds
    pub node: String,          // PVE node name
}

impl PveGuest {
    /// Build from one entry of /nodes/{node}/lxc
    fn from_list_entry(v: &serde_json::Value, node: &str) -> Self {
        // Name fallback: name -> hostname -> ""
        let name = v.get("name").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
            .or_else(|| v.get("hostname").and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or("").to_string();
        // PVE returns vmid as a number, older releases as a string
        let vmid = v.get("vmid").and_then(|v| v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0);
        PveGuest {
            vmid,
            name,
            status: v.get("status").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
            cpus: v.get("cpus").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
            cpu: v.get("cpu").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
            maxmem: v.get("maxmem").and_then(|v| v.as_u64()).unwrap_or(0),
            mem: v.get("mem").and_then(|v| v.as_u64()).unwrap_or(0),
            maxdisk: v.get("maxdisk").and_then(|v| v.as_u64()).unwrap_or(0),
            disk: v.get("disk").and_then(|v| v.as_u64()).unwrap_or(0),
            uptime: v.get("uptime").and_then(|v| v.as_u64()).unwrap_or(0),
            node: node.to_string(),
        }
    }
}

impl PveClient {
    /// Create a new PVE API client
    /// token format: "PVEAPIToken=user@realm!tokenid=uuid" (prefix optional)
    pub fn new(address: &str, port: u16, token: &str, node_name: &str) -> Self {
        let builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true); // PVE often uses self-signed certs

        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: format!("https://{}:{}", address, port),
            token: token.to_string(),
            node_name: node_name.to_string(),
            client,
        }
    }

    /// Build authorization header
    fn auth_header(&self) -> String {
        // If token already has the prefix, use as-is
        if self.token.starts_with("PVEAPIToken=") {
            self.token.clone()
        } else {
            format!("PVEAPIToken={}", self.token)
        }
    }

    /// Send a request to the PVE API and unwrap its `data` envelope
    async fn request(&self, method: Method, path: &str, form: &[(&str, String)]) -> Result<serde_json::Value, String> {
        let url = format!("{}/api2/json{}", self.base_url, path);
        debug!("PVE {} {}", method, url);

        let mut req = self.client.request(method, &url)
            .header("Authorization", self.auth_header());
        if !form.is_empty() {
            req = req.form(form);
        }

        let resp = req.send()
            .await
            .map_err(|e| format!("PVE request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("PVE API {} {}: {}", status.as_u16(), path, body));
        }

        let json: serde_json::Value = resp.json().await
            .map_err(|e| format!("PVE JSON parse: {}", e))?;

        Ok(json.get("data").cloned().unwrap_or(json))
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, String> {
        self.request(Method::GET, path, &[]).await
    }

    /// List all LXC containers on this node
    pub async fn list_containers(&self) -> Result<Vec<PveGuest>, String> {
        let data = self.get(&format!("/nodes/{}/lxc", self.node_name)).await?;
        let arr = data.as_array().ok_or("Expected array from /lxc")?;
        Ok(arr.iter().map(|v| PveGuest::from_list_entry(v, &self.node_name)).collect())
    }

    /// Get the PVE node name
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Check the PVE API is reachable and report its version
    pub async fn test_connection(&self) -> Result<String, String> {
        let data = self.get("/version").await?;
        let version = data.get("version").and_then(|v| v.as_str()).unwrap_or("unknown");
        let release = data.get("release").and_then(|v| v.as_str()).unwrap_or("");
        Ok(format!("Proxmox VE {} ({})", version, release))
    }
}

// ─── SDN ───

#[async_trait]
impl NetworkApi for PveClient {
    async fn create_zone(&self, zone_id: &str, zone_type: &str, options: &[(String, String)], dhcp_enabled: bool) -> Result<(), String> {
        let mut form = vec![
            ("zone", zone_id.to_string()),
            ("type", zone_type.to_string()),
        ];
        form.extend(options.iter().map(|(k, v)| (k.as_str(), v.clone())));
        if dhcp_enabled {
            // dnsmasq is the only DHCP backend PVE ships
            form.push(("dhcp", "dnsmasq".to_string()));
        }
        self.request(Method::POST, "/cluster/sdn/zones", &form).await?;
        info!("PVE SDN: created zone {} ({})", zone_id, zone_type);
        Ok(())
    }

    async fn create_vnet(&self, vnet_id: &str, zone_id: &str, vlan_tag: Option<u32>) -> Result<(), String> {
        let mut form = vec![
            ("vnet", vnet_id.to_string()),
            ("zone", zone_id.to_string()),
        ];
        if let Some(tag) = vlan_tag {
            form.push(("tag", tag.to_string()));
        }
        self.request(Method::POST, "/cluster/sdn/vnets", &form).await?;
        info!("PVE SDN: created vnet {} in zone {}", vnet_id, zone_id);
        Ok(())
    }

    async fn create_subnet(&self, vnet_id: &str, cidr: &str, gateway: &str, dhcp_enabled: bool, dhcp_range: &str) -> Result<(), String> {
        let mut form = vec![
            ("subnet", cidr.to_string()),
            ("type", "subnet".to_string()),
            ("gateway", gateway.to_string()),
            ("snat", "1".to_string()),
        ];
        if dhcp_enabled && !dhcp_range.is_empty() {
            form.push(("dhcp-range", dhcp_range.to_string()));
        }
        let path = format!("/cluster/sdn/vnets/{}/subnets", urlencoding::encode(vnet_id));
        self.request(Method::POST, &path, &form).await?;
        info!("PVE SDN: created subnet {} on vnet {} (gateway {})", cidr, vnet_id, gateway);
        Ok(())
    }

    async fn delete_subnet(&self, vnet_id: &str, subnet_id: &str) -> Result<(), String> {
        let path = format!("/cluster/sdn/vnets/{}/subnets/{}",
            urlencoding::encode(vnet_id), urlencoding::encode(subnet_id));
        self.request(Method::DELETE, &path, &[]).await?;
        info!("PVE SDN: deleted subnet {} from vnet {}", subnet_id, vnet_id);
        Ok(())
    }

    async fn delete_vnet(&self, vnet_id: &str) -> Result<(), String> {
        self.request(Method::DELETE, &format!("/cluster/sdn/vnets/{}", urlencoding::encode(vnet_id)), &[]).await?;
        info!("PVE SDN: deleted vnet {}", vnet_id);
        Ok(())
    }

    async fn delete_zone(&self, zone_id: &str) -> Result<(), String> {
        self.request(Method::DELETE, &format!("/cluster/sdn/zones/{}", urlencoding::encode(zone_id)), &[]).await?;
        info!("PVE SDN: deleted zone {}", zone_id);
        Ok(())
    }

    /// Commit pending SDN changes (PUT /cluster/sdn)
    async fn apply_config(&self) -> Result<(), String> {
        self.request(Method::PUT, "/cluster/sdn", &[]).await?;
        info!("PVE SDN: applied pending configuration");
        Ok(())
    }
}

#[async_trait]
impl ContainerLister for PveClient {
    async fn list_containers(&self) -> Result<Vec<PveGuest>, String> {
        PveClient::list_containers(self).await
    }
}
