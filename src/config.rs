// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Configuration: /etc/pvedash/config.toml

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::projects::orchestrator::SdnSettings;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pvedash/config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxmox: ProxmoxConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
}

/// Connection to the PVE node the dashboard manages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_pve_port")]
    pub port: u16,
    #[serde(default)]
    pub token: String,         // user@realm!tokenid=uuid
    #[serde(default = "default_node")]
    pub node: String,
}

fn default_address() -> String { "127.0.0.1".to_string() }
fn default_pve_port() -> u16 { 8006 }
fn default_node() -> String { "pve".to_string() }

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_pve_port(),
            token: String::new(),
            node: default_node(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// SDN zone type for zones created per project
    #[serde(default = "default_zone_type")]
    pub zone_type: String,
    #[serde(default = "default_ipam")]
    pub ipam: String,
}

fn default_data_file() -> String { "/var/lib/pvedash/projects.json".to_string() }
fn default_zone_type() -> String { "simple".to_string() }
fn default_ipam() -> String { "pve".to_string() }

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            zone_type: default_zone_type(),
            ipam: default_ipam(),
        }
    }
}

impl ProjectsConfig {
    pub fn sdn_settings(&self) -> SdnSettings {
        SdnSettings { zone_type: self.zone_type.clone(), ipam: self.ipam.clone() }
    }
}

impl Config {
    /// Load from `path`; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Config = toml::from_str(&content)
                    .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Ok(Config::default())
            }
            Err(e) => Err(format!("Failed to read {}: {}", path.display(), e)),
        }
    }
}
