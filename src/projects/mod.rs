// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Projects: logical groupings of LXC containers
//!
//! A project can own a container-ID range and a dedicated SDN network
//! (zone → VNet → subnet with DHCP). The store keeps projects and
//! container assignments on disk; the orchestrator provisions and tears
//! down the network around it.

pub mod orchestrator;
pub mod saga;
pub mod store;

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ─── Data Model ───

/// Dedicated network of a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub subnet: String,          // CIDR, e.g. 10.0.1.0/24
    pub gateway: String,
    #[serde(default)]
    pub nameserver: String,
    #[serde(default)]
    pub vnet_id: String,         // set once provisioned
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub vlan_tag: Option<u32>,
    /// The zone was created for this project and is removed with it
    #[serde(default)]
    pub auto_created_zone: bool,
}

impl NetworkConfig {
    pub fn is_provisioned(&self) -> bool {
        !self.vnet_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub container_id_start: Option<u32>,
    #[serde(default)]
    pub container_id_end: Option<u32>,
    pub created_at: i64,         // unix seconds
    pub updated_at: i64,
}

impl Project {
    /// Declared container-ID range, if both ends are set
    pub fn id_range(&self) -> Option<(u32, u32)> {
        match (self.container_id_start, self.container_id_end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }
}

// ─── Requests ───

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub container_id_start: Option<u32>,
    #[serde(default)]
    pub container_id_end: Option<u32>,
}

/// Partial update: only fields that are present (and non-empty) are applied
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub container_id_start: Option<u32>,
    #[serde(default)]
    pub container_id_end: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignProjectRequest {
    #[serde(default)]
    pub project_id: String,
}

/// Random 16-byte project id, hex encoded
pub fn generate_project_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current time as unix seconds
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ids_are_random_32_char_hex() {
        let a = generate_project_id();
        let b = generate_project_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn create_request_accepts_minimal_json() {
        let req: CreateProjectRequest = serde_json::from_str(r#"{"name":"web"}"#).unwrap();
        assert_eq!(req.name, "web");
        assert!(req.network.is_none());
        assert!(req.tags.is_empty());
    }

    #[test]
    fn project_serializes_null_network() {
        let p = Project {
            id: "abc".into(),
            name: "web".into(),
            description: String::new(),
            tags: vec!["prod".into()],
            network: None,
            container_id_start: Some(100),
            container_id_end: Some(199),
            created_at: 1,
            updated_at: 2,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert!(v["network"].is_null());
        assert_eq!(v["container_id_start"], 100);
        assert_eq!(p.id_range(), Some((100, 199)));
    }
}
