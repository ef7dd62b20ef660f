// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Project provisioning: creates and tears down a project's SDN network
//!
//! Create: zone → vnet → DHCP range → subnet → apply → persist, each
//! external step paired with its undo in a [`Saga`].
//! Delete: drop stale container assignments, refuse while live containers
//! remain, tear the network down best-effort, then remove the project.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::saga::{compensate, Saga};
use super::store::ProjectStore;
use super::{generate_project_id, CreateProjectRequest, NetworkConfig, Project};
use crate::error::ProjectError;
use crate::netcalc;
use crate::proxmox::PveGuest;

/// Proxmox SDN calls the orchestrator drives
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_zone(&self, zone_id: &str, zone_type: &str, options: &[(String, String)], dhcp_enabled: bool) -> Result<(), String>;
    async fn create_vnet(&self, vnet_id: &str, zone_id: &str, vlan_tag: Option<u32>) -> Result<(), String>;
    async fn create_subnet(&self, vnet_id: &str, cidr: &str, gateway: &str, dhcp_enabled: bool, dhcp_range: &str) -> Result<(), String>;
    async fn delete_subnet(&self, vnet_id: &str, subnet_id: &str) -> Result<(), String>;
    async fn delete_vnet(&self, vnet_id: &str) -> Result<(), String>;
    async fn delete_zone(&self, zone_id: &str) -> Result<(), String>;
    async fn apply_config(&self) -> Result<(), String>;
}

/// Live container inventory
#[async_trait]
pub trait ContainerLister: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<PveGuest>, String>;
}

/// How auto-created zones are configured
#[derive(Debug, Clone)]
pub struct SdnSettings {
    pub zone_type: String,
    pub ipam: String,
}

impl Default for SdnSettings {
    fn default() -> Self {
        Self { zone_type: "simple".to_string(), ipam: "pve".to_string() }
    }
}

pub struct Orchestrator {
    store: Arc<ProjectStore>,
    network: Arc<dyn NetworkApi>,
    containers: Arc<dyn ContainerLister>,
    sdn: SdnSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ProjectStore>,
        network: Arc<dyn NetworkApi>,
        containers: Arc<dyn ContainerLister>,
        sdn: SdnSettings,
    ) -> Self {
        Self { store, network, containers, sdn }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub async fn list_containers(&self) -> Result<Vec<PveGuest>, ProjectError> {
        self.containers.list_containers().await
            .map_err(|e| ProjectError::Provisioning(format!("Failed to list containers: {}", e)))
    }

    async fn live_vmids(&self) -> Result<HashSet<u32>, ProjectError> {
        Ok(self.list_containers().await?
            .iter()
            .filter_map(|g| u32::try_from(g.vmid).ok())
            .collect())
    }

    /// Create a project, provisioning its network first when a subnet is given
    pub async fn create_project(&self, mut req: CreateProjectRequest) -> Result<Project, ProjectError> {
        // Name and ID range problems must surface before anything external happens
        self.store.check_create(&req)?;
        let id = generate_project_id();

        let net = match req.network.take().filter(|n| !n.subnet.trim().is_empty()) {
            Some(net) => net,
            None => return self.store.create_project_with_id(&id, req),
        };

        let subnet = net.subnet.trim().to_string();
        let gateway = net.gateway.trim().to_string();
        if !netcalc::is_valid_cidr(&subnet) {
            return Err(ProjectError::Validation(format!("'{}' is not a valid IPv4 network CIDR", subnet)));
        }
        if gateway.is_empty() {
            return Err(ProjectError::Validation("A gateway is required when a subnet is given".to_string()));
        }
        netcalc::validate_gateway_in_subnet(&subnet, &gateway).map_err(ProjectError::Validation)?;

        let sdn_id = netcalc::generate_sdn_identifier(&id, &req.name);
        let zone = sdn_id.clone();
        let vnet = sdn_id;
        info!("Projects: provisioning network {} (zone {}, vnet {}) for '{}'", subnet, zone, vnet, req.name);

        let mut saga = Saga::new(format!("provision {}", req.name));
        let options = vec![("ipam".to_string(), self.sdn.ipam.clone())];

        let net_api = self.network.clone();
        let undo_zone = zone.clone();
        saga.step(
            "create zone",
            async {
                self.network.create_zone(&zone, &self.sdn.zone_type, &options, true).await
                    .map_err(|e| ProjectError::Provisioning(format!("Failed to create zone {}: {}", zone, e)))
            },
            compensate(move || async move { net_api.delete_zone(&undo_zone).await }),
        ).await?;

        let net_api = self.network.clone();
        let undo_vnet = vnet.clone();
        saga.step(
            "create vnet",
            async {
                self.network.create_vnet(&vnet, &zone, net.vlan_tag).await
                    .map_err(|e| ProjectError::Provisioning(format!("Failed to create vnet {}: {}", vnet, e)))
            },
            compensate(move || async move { net_api.delete_vnet(&undo_vnet).await }),
        ).await?;

        let dhcp_range = saga.step(
            "compute DHCP range",
            async { netcalc::calculate_dhcp_range(&subnet, &gateway).map_err(ProjectError::Validation) },
            None,
        ).await?;

        let net_api = self.network.clone();
        let (undo_vnet, undo_subnet) = (vnet.clone(), netcalc::sdn_subnet_id(&zone, &subnet));
        saga.step(
            "create subnet",
            async {
                self.network.create_subnet(&vnet, &subnet, &gateway, true, &dhcp_range).await
                    .map_err(|e| ProjectError::Provisioning(format!("Failed to create subnet {}: {}", subnet, e)))
            },
            compensate(move || async move { net_api.delete_subnet(&undo_vnet, &undo_subnet).await }),
        ).await?;

        // Resources exist either way; an unapplied config can be applied from the PVE UI
        let applied = match self.network.apply_config().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Projects: SDN apply failed for '{}' (apply manually): {}", req.name, e);
                false
            }
        };

        req.network = Some(NetworkConfig {
            subnet,
            gateway,
            nameserver: net.nameserver,
            vnet_id: vnet,
            zone,
            vlan_tag: net.vlan_tag,
            auto_created_zone: true,
        });
        let result = saga.step("persist project", async { self.store.create_project_with_id(&id, req) }, None).await;
        if result.is_err() && applied {
            // The rollback deletes are pending until applied
            if let Err(e) = self.network.apply_config().await {
                warn!("Projects: SDN apply after rollback failed: {}", e);
            }
        }
        result
    }

    /// Delete a project once no live container is assigned to it
    pub async fn delete_project(&self, id: &str) -> Result<(), ProjectError> {
        let project = self.store.get_project(id)
            .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", id)))?;

        let live = self.live_vmids().await?;
        for vmid in self.store.get_project_containers(id) {
            if !live.contains(&vmid) {
                info!("Projects: clearing stale assignment of container {} to '{}'", vmid, project.name);
                self.store.assign_container(vmid, "")?;
            }
        }

        let remaining = self.store.get_project_containers(id);
        if !remaining.is_empty() {
            return Err(ProjectError::Conflict(format!(
                "Project '{}' still has containers assigned: {:?}", project.name, remaining)));
        }

        let Some(net) = project.network.as_ref().filter(|n| n.is_provisioned()) else {
            return self.store.delete_project(id);
        };
        self.teardown_network(net).await;

        let result = self.store.delete_project(id);
        if let Err(e) = &result {
            // The SDN resources are gone; a retry must not tear them down again
            warn!("Projects: '{}' kept after network teardown: {}", project.name, e);
            if let Err(e) = self.store.clear_network(id) {
                warn!("Projects: failed to clear network of '{}': {}", project.name, e);
            }
        }
        result
    }

    /// Remove subnet, vnet and (if ours) zone. Each step is attempted regardless of the last.
    async fn teardown_network(&self, net: &NetworkConfig) {
        let subnet_id = netcalc::sdn_subnet_id(&net.zone, &net.subnet);
        if let Err(e) = self.network.delete_subnet(&net.vnet_id, &subnet_id).await {
            warn!("Projects: failed to delete subnet {}: {}", subnet_id, e);
        }
        if let Err(e) = self.network.delete_vnet(&net.vnet_id).await {
            warn!("Projects: failed to delete vnet {}: {}", net.vnet_id, e);
        }
        if net.auto_created_zone {
            if let Err(e) = self.network.delete_zone(&net.zone).await {
                warn!("Projects: failed to delete zone {}: {}", net.zone, e);
            }
        }
        if let Err(e) = self.network.apply_config().await {
            warn!("Projects: SDN apply after teardown failed: {}", e);
        }
    }

    /// Assign a live container to a project ("" unassigns)
    pub async fn assign_container(&self, vmid: u32, project_id: &str) -> Result<(), ProjectError> {
        if !project_id.is_empty() && !self.live_vmids().await?.contains(&vmid) {
            return Err(ProjectError::NotFound(format!("Container {} not found", vmid)));
        }
        self.store.assign_container(vmid, project_id)
    }

    /// Pick a VMID for a new container in a project.
    /// An explicit `requested` id is checked against the range and current use.
    pub async fn allocate_container_id(&self, project_id: &str, requested: Option<u32>) -> Result<u32, ProjectError> {
        let project = self.store.get_project(project_id)
            .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", project_id)))?;
        let live = self.live_vmids().await?;

        let Some(vmid) = requested else {
            let mut taken = live;
            taken.extend(self.store.containers_assigned_elsewhere(project_id));
            return self.store.next_container_id_excluding(project_id, &taken);
        };
        if let Some((start, end)) = project.id_range() {
            if vmid < start || vmid > end {
                return Err(ProjectError::Validation(format!(
                    "VMID {} is outside project '{}' range {}-{}", vmid, project.name, start, end)));
            }
        }
        let owner = self.store.get_container_project(vmid);
        if live.contains(&vmid) || (!owner.is_empty() && owner != project_id) {
            return Err(ProjectError::Conflict(format!("VMID {} already in use", vmid)));
        }
        Ok(vmid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; any op named in `fail` returns an error
    #[derive(Default)]
    pub(crate) struct MockPve {
        pub(crate) calls: Mutex<Vec<(String, String)>>,
        fail: Mutex<HashSet<&'static str>>,
        pub(crate) live: Mutex<Vec<u64>>,
        /// Simulates a concurrent create landing while the subnet is created
        racer: Mutex<Option<(Arc<ProjectStore>, String)>>,
        /// Assigns a container while the vnet is being deleted
        late_assign: Mutex<Option<(Arc<ProjectStore>, u32, String)>>,
    }

    impl MockPve {
        fn record(&self, op: &'static str, arg: String) -> Result<(), String> {
            self.calls.lock().unwrap().push((op.to_string(), arg));
            if self.fail.lock().unwrap().contains(op) {
                Err(format!("{} refused", op))
            } else {
                Ok(())
            }
        }

        pub(crate) fn ops(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
        }

        fn args(&self, op: &str) -> Vec<String> {
            self.calls.lock().unwrap().iter().filter(|(o, _)| o == op).map(|(_, a)| a.clone()).collect()
        }

        fn fail_on(&self, op: &'static str) {
            self.fail.lock().unwrap().insert(op);
        }
    }

    #[async_trait]
    impl NetworkApi for MockPve {
        async fn create_zone(&self, zone_id: &str, zone_type: &str, _options: &[(String, String)], _dhcp: bool) -> Result<(), String> {
            self.record("create_zone", format!("{} {}", zone_id, zone_type))
        }
        async fn create_vnet(&self, vnet_id: &str, zone_id: &str, vlan_tag: Option<u32>) -> Result<(), String> {
            self.record("create_vnet", format!("{} {} {:?}", vnet_id, zone_id, vlan_tag))
        }
        async fn create_subnet(&self, vnet_id: &str, cidr: &str, gateway: &str, _dhcp: bool, dhcp_range: &str) -> Result<(), String> {
            if let Some((store, name)) = self.racer.lock().unwrap().take() {
                store.create_project_with_id("racer", CreateProjectRequest { name, ..Default::default() }).unwrap();
            }
            self.record("create_subnet", format!("{} {} {} {}", vnet_id, cidr, gateway, dhcp_range))
        }
        async fn delete_subnet(&self, vnet_id: &str, subnet_id: &str) -> Result<(), String> {
            self.record("delete_subnet", format!("{} {}", vnet_id, subnet_id))
        }
        async fn delete_vnet(&self, vnet_id: &str) -> Result<(), String> {
            if let Some((store, vmid, project_id)) = self.late_assign.lock().unwrap().take() {
                store.assign_container(vmid, &project_id).unwrap();
            }
            self.record("delete_vnet", vnet_id.to_string())
        }
        async fn delete_zone(&self, zone_id: &str) -> Result<(), String> {
            self.record("delete_zone", zone_id.to_string())
        }
        async fn apply_config(&self) -> Result<(), String> {
            self.record("apply_config", String::new())
        }
    }

    #[async_trait]
    impl ContainerLister for MockPve {
        async fn list_containers(&self) -> Result<Vec<PveGuest>, String> {
            self.record("list_containers", String::new())?;
            Ok(self.live.lock().unwrap().iter().map(|&vmid| PveGuest {
                vmid,
                name: format!("ct{}", vmid),
                status: "running".to_string(),
                cpus: 1,
                cpu: 0.0,
                maxmem: 0,
                mem: 0,
                maxdisk: 0,
                disk: 0,
                uptime: 0,
                node: "pve1".to_string(),
            }).collect())
        }
    }

    pub(crate) fn setup() -> (tempfile::TempDir, Arc<MockPve>, Arc<ProjectStore>, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProjectStore::open(dir.path().join("projects.json")).unwrap());
        let pve = Arc::new(MockPve::default());
        let orch = Orchestrator::new(store.clone(), pve.clone(), pve.clone(), SdnSettings::default());
        (dir, pve, store, orch)
    }

    fn with_net(name: &str, subnet: &str, gateway: &str) -> CreateProjectRequest {
        CreateProjectRequest {
            name: name.to_string(),
            network: Some(NetworkConfig {
                subnet: subnet.to_string(),
                gateway: gateway.to_string(),
                nameserver: "10.0.1.1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_without_subnet_makes_no_calls() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(CreateProjectRequest { name: "web".into(), ..Default::default() }).await.unwrap();
        assert!(p.network.is_none());
        assert_eq!(p.id.len(), 32);
        assert!(pve.ops().is_empty());
        assert_eq!(store.get_project(&p.id), Some(p));
    }

    #[tokio::test]
    async fn create_with_subnet_provisions_in_order() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();

        assert_eq!(pve.ops(), vec!["create_zone", "create_vnet", "create_subnet", "apply_config"]);
        let net = p.network.clone().unwrap();
        let sdn_id = format!("prj{}", &p.id[..5]);
        assert_eq!(net.zone, sdn_id);
        assert_eq!(net.vnet_id, sdn_id);
        assert!(net.auto_created_zone);
        assert_eq!(net.nameserver, "10.0.1.1");
        assert_eq!(pve.args("create_zone"), vec![format!("{} simple", sdn_id)]);
        assert_eq!(
            pve.args("create_subnet"),
            vec![format!("{} 10.0.1.0/24 10.0.1.1 start-address=10.0.1.152,end-address=10.0.1.252", sdn_id)]
        );
        assert_eq!(store.get_project(&p.id), Some(p));
    }

    #[tokio::test]
    async fn invalid_network_input_fails_before_any_call() {
        let (_dir, pve, store, orch) = setup();
        for req in [
            with_net("a", "10.0.1.5/24", "10.0.1.1"),
            with_net("b", "10.0.1.0/24", ""),
            with_net("c", "10.0.1.0/24", "10.0.2.1"),
            with_net("d", "10.0.1.0/24", "10.0.1.255"),
            with_net("e", "fd00::/64", "fd00::1"),
        ] {
            let err = orch.create_project(req).await.unwrap_err();
            assert!(matches!(err, ProjectError::Validation(_)), "{}", err);
        }
        assert!(pve.ops().is_empty());
        assert!(store.list_projects().is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_fails_before_any_call() {
        let (_dir, pve, _store, orch) = setup();
        orch.create_project(CreateProjectRequest { name: "web".into(), ..Default::default() }).await.unwrap();
        let err = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Conflict(_)));
        assert!(pve.ops().is_empty());
    }

    #[tokio::test]
    async fn zone_failure_has_nothing_to_undo() {
        let (_dir, pve, store, orch) = setup();
        pve.fail_on("create_zone");
        let err = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Provisioning(_)));
        assert_eq!(pve.ops(), vec!["create_zone"]);
        assert!(store.list_projects().is_empty());
    }

    #[tokio::test]
    async fn vnet_failure_removes_zone() {
        let (_dir, pve, store, orch) = setup();
        pve.fail_on("create_vnet");
        let err = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Provisioning(_)));
        assert_eq!(pve.ops(), vec!["create_zone", "create_vnet", "delete_zone"]);
        assert!(store.list_projects().is_empty());
    }

    #[tokio::test]
    async fn subnet_failure_removes_vnet_then_zone() {
        let (_dir, pve, store, orch) = setup();
        pve.fail_on("create_subnet");
        let err = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Provisioning(_)));
        assert_eq!(pve.ops(), vec!["create_zone", "create_vnet", "create_subnet", "delete_vnet", "delete_zone"]);
        assert!(store.list_projects().is_empty());
    }

    #[tokio::test]
    async fn dhcp_failure_removes_vnet_then_zone() {
        let (_dir, pve, store, orch) = setup();
        let err = orch.create_project(with_net("tiny", "10.0.1.0/30", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Validation(_)));
        assert_eq!(pve.ops(), vec!["create_zone", "create_vnet", "delete_vnet", "delete_zone"]);
        assert!(store.list_projects().is_empty());
    }

    #[tokio::test]
    async fn apply_failure_is_not_fatal() {
        let (_dir, pve, store, orch) = setup();
        pve.fail_on("apply_config");
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();
        assert!(p.network.unwrap().is_provisioned());
        assert_eq!(store.list_projects().len(), 1);
    }

    #[tokio::test]
    async fn persist_failure_unwinds_network() {
        let (_dir, pve, store, orch) = setup();
        *pve.racer.lock().unwrap() = Some((store.clone(), "web".to_string()));

        let err = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap_err();
        assert!(matches!(err, ProjectError::Conflict(_)));
        assert_eq!(pve.ops(), vec![
            "create_zone", "create_vnet", "create_subnet", "apply_config",
            "delete_subnet", "delete_vnet", "delete_zone", "apply_config",
        ]);
        assert_eq!(store.list_projects().len(), 1);
        assert!(store.get_project("racer").is_some());
    }

    #[tokio::test]
    async fn delete_clears_stale_assignments_and_tears_down() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();
        store.assign_container(101, &p.id).unwrap();
        store.assign_container(102, &p.id).unwrap();
        pve.calls.lock().unwrap().clear();

        orch.delete_project(&p.id).await.unwrap();

        let sdn_id = format!("prj{}", &p.id[..5]);
        assert_eq!(pve.ops(), vec!["list_containers", "delete_subnet", "delete_vnet", "delete_zone", "apply_config"]);
        assert_eq!(pve.args("delete_subnet"), vec![format!("{} {}-10.0.1.0-24", sdn_id, sdn_id)]);
        assert!(store.get_project(&p.id).is_none());
        assert_eq!(store.get_container_project(101), "");
    }

    #[tokio::test]
    async fn delete_blocked_by_live_container() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();
        pve.live.lock().unwrap().push(101);
        store.assign_container(101, &p.id).unwrap();
        store.assign_container(102, &p.id).unwrap();
        pve.calls.lock().unwrap().clear();

        let err = orch.delete_project(&p.id).await.unwrap_err();
        assert!(matches!(err, ProjectError::Conflict(_)));
        assert_eq!(pve.ops(), vec!["list_containers"]);
        assert_eq!(store.get_project_containers(&p.id), vec![101]);
        assert!(store.get_project(&p.id).is_some());
    }

    #[tokio::test]
    async fn teardown_failures_do_not_block_delete() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();
        pve.calls.lock().unwrap().clear();
        pve.fail_on("delete_subnet");
        pve.fail_on("delete_vnet");

        orch.delete_project(&p.id).await.unwrap();
        assert_eq!(pve.ops(), vec!["list_containers", "delete_subnet", "delete_vnet", "delete_zone", "apply_config"]);
        assert!(store.get_project(&p.id).is_none());
    }

    #[tokio::test]
    async fn failed_delete_after_teardown_forgets_network() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(with_net("web", "10.0.1.0/24", "10.0.1.1")).await.unwrap();
        *pve.late_assign.lock().unwrap() = Some((store.clone(), 130, p.id.clone()));
        pve.calls.lock().unwrap().clear();

        let err = orch.delete_project(&p.id).await.unwrap_err();
        assert!(matches!(err, ProjectError::Conflict(_)));
        assert!(store.get_project(&p.id).unwrap().network.is_none());

        // Second attempt finds the container stale and skips the SDN calls
        pve.calls.lock().unwrap().clear();
        orch.delete_project(&p.id).await.unwrap();
        assert_eq!(pve.ops(), vec!["list_containers"]);
        assert!(store.get_project(&p.id).is_none());
    }

    #[tokio::test]
    async fn pre_existing_zone_is_kept() {
        let (_dir, pve, store, orch) = setup();
        let req = CreateProjectRequest {
            name: "shared".into(),
            network: Some(NetworkConfig {
                subnet: "10.0.9.0/24".into(),
                gateway: "10.0.9.1".into(),
                vnet_id: "sharedv".into(),
                zone: "corp".into(),
                auto_created_zone: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        store.create_project_with_id("shared", req).unwrap();

        orch.delete_project("shared").await.unwrap();
        assert_eq!(pve.ops(), vec!["list_containers", "delete_subnet", "delete_vnet", "apply_config"]);
    }

    #[tokio::test]
    async fn delete_unknown_or_unlistable() {
        let (_dir, pve, store, orch) = setup();
        assert!(matches!(orch.delete_project("nope").await, Err(ProjectError::NotFound(_))));

        let p = orch.create_project(CreateProjectRequest { name: "web".into(), ..Default::default() }).await.unwrap();
        pve.fail_on("list_containers");
        assert!(matches!(orch.delete_project(&p.id).await, Err(ProjectError::Provisioning(_))));
        assert!(store.get_project(&p.id).is_some());
    }

    #[tokio::test]
    async fn allocate_skips_assigned_and_live_ids() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(CreateProjectRequest {
            name: "web".into(),
            container_id_start: Some(100),
            container_id_end: Some(103),
            ..Default::default()
        }).await.unwrap();
        store.assign_container(100, &p.id).unwrap();
        pve.live.lock().unwrap().push(101);

        assert_eq!(orch.allocate_container_id(&p.id, None).await.unwrap(), 102);
        assert_eq!(orch.allocate_container_id(&p.id, Some(103)).await.unwrap(), 103);
        assert!(matches!(orch.allocate_container_id(&p.id, Some(101)).await, Err(ProjectError::Conflict(_))));
        assert!(matches!(orch.allocate_container_id(&p.id, Some(150)).await, Err(ProjectError::Validation(_))));

        // Stale assignments to another project are skipped too
        let other = orch.create_project(CreateProjectRequest { name: "db".into(), ..Default::default() }).await.unwrap();
        store.assign_container(102, &other.id).unwrap();
        assert_eq!(orch.allocate_container_id(&p.id, None).await.unwrap(), 103);
        store.assign_container(102, "").unwrap();

        pve.live.lock().unwrap().extend([102, 103]);
        assert!(matches!(orch.allocate_container_id(&p.id, None).await, Err(ProjectError::NotFound(_))));
    }

    #[tokio::test]
    async fn assign_requires_live_container() {
        let (_dir, pve, store, orch) = setup();
        let p = orch.create_project(CreateProjectRequest { name: "web".into(), ..Default::default() }).await.unwrap();
        assert!(matches!(orch.assign_container(120, &p.id).await, Err(ProjectError::NotFound(_))));

        pve.live.lock().unwrap().push(120);
        orch.assign_container(120, &p.id).await.unwrap();
        assert_eq!(store.get_container_project(120), p.id);

        // Unassigning never needs the container to exist
        pve.live.lock().unwrap().clear();
        orch.assign_container(120, "").await.unwrap();
        assert_eq!(store.get_container_project(120), "");
    }
}
