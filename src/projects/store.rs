// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Project store: projects and VMID assignments, persisted as one JSON file
//!
//! One RwLock guards both maps. Mutations hold the write lock across the
//! file write: the change is staged on a copy, written to disk (temp file
//! then rename) and only swapped into memory once the write succeeded.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::{now, CreateProjectRequest, Project, UpdateProjectRequest};
use crate::error::ProjectError;

/// Lowest VMID a project range may start at (Proxmox reserves < 100)
pub const MIN_CONTAINER_ID: u32 = 100;

/// On-disk layout of the projects file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    projects: HashMap<String, Project>,
    #[serde(default)]
    vmid_map: HashMap<u32, String>,
}

pub struct ProjectStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl ProjectStore {
    /// Load the store from `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str::<StoreState>(&data)
                .map_err(|e| ProjectError::Persistence(format!("Failed to parse {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(ProjectError::Persistence(format!("Failed to read {}: {}", path.display(), e))),
        };
        info!("Projects: loaded {} projects and {} container assignments from {}",
            state.projects.len(), state.vmid_map.len(), path.display());
        Ok(Self { path, state: RwLock::new(state) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        // State is only replaced after a successful write, so a poisoned lock still holds committed data
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `change` on a staged copy, persist it, then commit it to memory
    fn commit<T>(&self, change: impl FnOnce(&mut StoreState) -> Result<T, ProjectError>) -> Result<T, ProjectError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut staged = state.clone();
        let out = change(&mut staged)?;
        write_atomic(&self.path, &staged)?;
        *state = staged;
        Ok(out)
    }

    // ─── Reads ───

    pub fn list_projects(&self) -> Vec<Project> {
        let state = self.read();
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        projects
    }

    pub fn get_project(&self, id: &str) -> Option<Project> {
        self.read().projects.get(id).cloned()
    }

    /// Project a container belongs to, or "" when unassigned
    pub fn get_container_project(&self, vmid: u32) -> String {
        self.read().vmid_map.get(&vmid).cloned().unwrap_or_default()
    }

    pub fn get_project_containers(&self, project_id: &str) -> Vec<u32> {
        let state = self.read();
        let mut vmids: Vec<u32> = state.vmid_map.iter()
            .filter(|(_, pid)| pid.as_str() == project_id)
            .map(|(vmid, _)| *vmid)
            .collect();
        vmids.sort_unstable();
        vmids
    }

    /// VMIDs assigned to any project other than `project_id`
    pub fn containers_assigned_elsewhere(&self, project_id: &str) -> HashSet<u32> {
        self.read().vmid_map.iter()
            .filter(|(_, pid)| pid.as_str() != project_id)
            .map(|(vmid, _)| *vmid)
            .collect()
    }

    /// Name and range checks a create would run, without writing anything
    pub fn check_create(&self, req: &CreateProjectRequest) -> Result<(), ProjectError> {
        validate_create(&self.read(), req)
    }

    pub fn validate_container_id_range(&self, exclude_project_id: &str, start: u32, end: u32) -> Result<(), ProjectError> {
        check_range(&self.read(), exclude_project_id, start, end)
    }

    /// First ID in the project's range not already assigned to it
    pub fn get_next_container_id_in_range(&self, project_id: &str) -> Result<u32, ProjectError> {
        self.next_container_id_excluding(project_id, &HashSet::new())
    }

    /// Like `get_next_container_id_in_range`, also skipping `taken`
    pub fn next_container_id_excluding(&self, project_id: &str, taken: &HashSet<u32>) -> Result<u32, ProjectError> {
        let state = self.read();
        let project = state.projects.get(project_id)
            .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", project_id)))?;
        let (start, end) = project.id_range()
            .ok_or_else(|| ProjectError::Validation(format!("Project '{}' has no container ID range", project.name)))?;

        let assigned: HashSet<u32> = state.vmid_map.iter()
            .filter(|(_, pid)| pid.as_str() == project_id)
            .map(|(vmid, _)| *vmid)
            .collect();

        (start..=end)
            .find(|id| !assigned.contains(id) && !taken.contains(id))
            .ok_or_else(|| ProjectError::NotFound(format!("No available IDs in range {}-{} for project '{}'", start, end, project.name)))
    }

    // ─── Mutations ───

    pub fn create_project_with_id(&self, id: &str, req: CreateProjectRequest) -> Result<Project, ProjectError> {
        let project = self.commit(|state| {
            if state.projects.contains_key(id) {
                return Err(ProjectError::Conflict(format!("Project id '{}' already exists", id)));
            }
            validate_create(state, &req)?;
            let ts = now();
            let project = Project {
                id: id.to_string(),
                name: req.name.trim().to_string(),
                description: req.description,
                tags: req.tags,
                network: req.network,
                container_id_start: req.container_id_start,
                container_id_end: req.container_id_end,
                created_at: ts,
                updated_at: ts,
            };
            state.projects.insert(id.to_string(), project.clone());
            Ok(project)
        })?;
        info!("Projects: created '{}' ({})", project.name, project.id);
        Ok(project)
    }

    pub fn update_project(&self, id: &str, req: UpdateProjectRequest) -> Result<Project, ProjectError> {
        let project = self.commit(|state| {
            if !state.projects.contains_key(id) {
                return Err(ProjectError::NotFound(format!("Project '{}' not found", id)));
            }

            let name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
            if let Some(name) = name {
                if state.projects.values().any(|p| p.id != id && p.name == name) {
                    return Err(ProjectError::Conflict(format!("Project name '{}' already exists", name)));
                }
            }

            let range = match (req.container_id_start, req.container_id_end) {
                (Some(s), Some(e)) => {
                    check_range(state, id, s, e)?;
                    Some((s, e))
                }
                (None, None) => None,
                _ => return Err(ProjectError::Validation(
                    "container_id_start and container_id_end must be set together".to_string())),
            };

            let project = state.projects.get_mut(id)
                .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", id)))?;

            if let Some(net) = req.network {
                // Subnet and SDN ids are fixed once provisioned; only DNS can move
                match project.network.as_mut() {
                    Some(existing) => {
                        if !net.nameserver.is_empty() {
                            existing.nameserver = net.nameserver;
                        }
                    }
                    None => return Err(ProjectError::Validation(
                        "A network can only be attached when the project is created".to_string())),
                }
            }

            if let Some(name) = name { project.name = name.to_string(); }
            if let Some(desc) = req.description.filter(|d| !d.is_empty()) { project.description = desc; }
            if let Some(tags) = req.tags { project.tags = tags; }
            if let Some((s, e)) = range {
                project.container_id_start = Some(s);
                project.container_id_end = Some(e);
            }
            project.updated_at = now();
            Ok(project.clone())
        })?;
        info!("Projects: updated '{}' ({})", project.name, project.id);
        Ok(project)
    }

    /// Forget a project's network once its SDN resources are gone
    pub fn clear_network(&self, id: &str) -> Result<(), ProjectError> {
        self.commit(|state| {
            let project = state.projects.get_mut(id)
                .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", id)))?;
            project.network = None;
            project.updated_at = now();
            Ok(())
        })?;
        info!("Projects: cleared network of {}", id);
        Ok(())
    }

    pub fn delete_project(&self, id: &str) -> Result<(), ProjectError> {
        let name = self.commit(|state| {
            let project = state.projects.get(id)
                .ok_or_else(|| ProjectError::NotFound(format!("Project '{}' not found", id)))?;
            let assigned = state.vmid_map.values().filter(|pid| pid.as_str() == id).count();
            if assigned > 0 {
                return Err(ProjectError::Conflict(format!(
                    "Project '{}' still has {} container(s) assigned", project.name, assigned)));
            }
            let name = project.name.clone();
            state.projects.remove(id);
            Ok(name)
        })?;
        info!("Projects: deleted '{}' ({})", name, id);
        Ok(())
    }

    /// Assign `vmid` to `project_id`; an empty project id unassigns it
    pub fn assign_container(&self, vmid: u32, project_id: &str) -> Result<(), ProjectError> {
        if vmid == 0 {
            return Err(ProjectError::Validation("VMID must be a positive integer".to_string()));
        }
        self.commit(|state| {
            if project_id.is_empty() {
                state.vmid_map.remove(&vmid);
                return Ok(());
            }
            if !state.projects.contains_key(project_id) {
                return Err(ProjectError::NotFound(format!("Project '{}' not found", project_id)));
            }
            state.vmid_map.insert(vmid, project_id.to_string());
            Ok(())
        })?;
        if project_id.is_empty() {
            debug!("Projects: container {} unassigned", vmid);
        } else {
            info!("Projects: container {} assigned to {}", vmid, project_id);
        }
        Ok(())
    }
}

// ─── Validation ───

fn validate_create(state: &StoreState, req: &CreateProjectRequest) -> Result<(), ProjectError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ProjectError::Validation("Project name is required".to_string()));
    }
    if state.projects.values().any(|p| p.name == name) {
        return Err(ProjectError::Conflict(format!("Project name '{}' already exists", name)));
    }
    match (req.container_id_start, req.container_id_end) {
        (Some(s), Some(e)) => check_range(state, "", s, e),
        (None, None) => Ok(()),
        _ => Err(ProjectError::Validation(
            "container_id_start and container_id_end must be set together".to_string())),
    }
}

fn check_range(state: &StoreState, exclude_project_id: &str, start: u32, end: u32) -> Result<(), ProjectError> {
    if start == 0 || end == 0 {
        return Err(ProjectError::Validation("Container ID range bounds must be positive".to_string()));
    }
    if start > end {
        return Err(ProjectError::Validation(format!("Container ID range start {} is after end {}", start, end)));
    }
    if start < MIN_CONTAINER_ID {
        return Err(ProjectError::Validation(format!("Container ID range must start at {} or above", MIN_CONTAINER_ID)));
    }

    for other in state.projects.values() {
        if other.id == exclude_project_id {
            continue;
        }
        if let Some((os, oe)) = other.id_range() {
            let overlaps = (start >= os && start <= oe)
                || (end >= os && end <= oe)
                || (start <= os && end >= oe);
            if overlaps {
                return Err(ProjectError::Conflict(format!(
                    "Container ID range {}-{} overlaps project '{}' ({}-{})", start, end, other.name, os, oe)));
            }
        }
    }
    Ok(())
}

/// Write the state to a sibling temp file and rename it over `path`
fn write_atomic(path: &Path, state: &StoreState) -> Result<(), ProjectError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| ProjectError::Persistence(format!("Failed to serialize projects: {}", e)))?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| ProjectError::Persistence(format!("Failed to create {}: {}", dir.display(), e)))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ProjectError::Persistence(format!("Failed to write {}: {}", path.display(), e))
    })
}
