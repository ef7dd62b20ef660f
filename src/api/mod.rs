// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! REST API for projects and container assignment

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::projects::orchestrator::Orchestrator;
use crate::projects::{AssignProjectRequest, CreateProjectRequest, UpdateProjectRequest};

/// Shared application state
pub struct AppState {
    pub projects: Arc<Orchestrator>,
}

// ─── Projects API ───

/// GET /api/projects: all projects
pub async fn list_projects(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.projects.store().list_projects())
}

/// POST /api/projects: create a project (and its network if a subnet is given)
pub async fn create_project(state: web::Data<AppState>, body: web::Json<CreateProjectRequest>) -> HttpResponse {
    match state.projects.create_project(body.into_inner()).await {
        Ok(project) => HttpResponse::Created().json(project),
        Err(e) => e.to_response(),
    }
}

/// GET /api/projects/{id}: project with its assigned containers
pub async fn get_project(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    let store = state.projects.store();
    match store.get_project(&id) {
        Some(project) => HttpResponse::Ok().json(serde_json::json!({
            "project": project,
            "containers": store.get_project_containers(&id),
        })),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Project not found"
        })),
    }
}

/// PUT /api/projects/{id}: partial update of project metadata
pub async fn update_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateProjectRequest>,
) -> HttpResponse {
    match state.projects.store().update_project(&path.into_inner(), body.into_inner()) {
        Ok(project) => HttpResponse::Ok().json(project),
        Err(e) => e.to_response(),
    }
}

/// DELETE /api/projects/{id}: delete a project and tear down its network
pub async fn delete_project(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    match state.projects.delete_project(&id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "deleted": true })),
        Err(e) => e.to_response(),
    }
}

#[derive(Deserialize)]
pub struct NextVmidQuery {
    pub vmid: Option<u32>,
}

/// GET /api/projects/{id}/next-vmid: pick (or check ?vmid=) a container ID for the project
pub async fn next_vmid(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<NextVmidQuery>,
) -> HttpResponse {
    match state.projects.allocate_container_id(&path.into_inner(), query.vmid).await {
        Ok(vmid) => HttpResponse::Ok().json(serde_json::json!({ "vmid": vmid })),
        Err(e) => e.to_response(),
    }
}

// ─── Containers API ───

/// GET /api/containers: live containers with their project
pub async fn list_containers(state: web::Data<AppState>) -> HttpResponse {
    let guests = match state.projects.list_containers().await {
        Ok(g) => g,
        Err(e) => return e.to_response(),
    };
    let store = state.projects.store();
    let list: Vec<serde_json::Value> = guests.into_iter().map(|g| {
        let project_id = u32::try_from(g.vmid).map(|v| store.get_container_project(v)).unwrap_or_default();
        let mut entry = serde_json::to_value(&g).unwrap_or_default();
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("project_id".to_string(), serde_json::Value::String(project_id));
        }
        entry
    }).collect();
    HttpResponse::Ok().json(list)
}

/// PUT /api/containers/{vmid}/project: assign (or with "" unassign) a container
pub async fn assign_container(
    state: web::Data<AppState>,
    path: web::Path<u32>,
    body: web::Json<AssignProjectRequest>,
) -> HttpResponse {
    let vmid = path.into_inner();
    match state.projects.assign_container(vmid, &body.project_id).await {
        Ok(()) => {
            info!("Container {} project set to '{}'", vmid, body.project_id);
            HttpResponse::Ok().json(serde_json::json!({
                "vmid": vmid,
                "project_id": body.project_id,
            }))
        }
        Err(e) => e.to_response(),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Projects
        .route("/api/projects", web::get().to(list_projects))
        .route("/api/projects", web::post().to(create_project))
        .route("/api/projects/{id}", web::get().to(get_project))
        .route("/api/projects/{id}", web::put().to(update_project))
        .route("/api/projects/{id}", web::delete().to(delete_project))
        .route("/api/projects/{id}/next-vmid", web::get().to(next_vmid))
        // Containers
        .route("/api/containers", web::get().to(list_containers))
        .route("/api/containers/{vmid}/project", web::put().to(assign_container));
}
