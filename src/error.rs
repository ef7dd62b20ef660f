// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Error taxonomy for project and network provisioning

use actix_web::HttpResponse;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Malformed or out-of-policy input (bad CIDR, gateway, ID range)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Duplicate name, overlapping range, VMID in use, containers still assigned
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown project, or no free container ID left in a range
    #[error("Not found: {0}")]
    NotFound(String),

    /// A Proxmox call failed while creating or inspecting external resources
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// The projects file could not be read or written
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl ProjectError {
    /// Map onto the JSON error body the REST API returns
    pub fn to_response(&self) -> HttpResponse {
        let body = serde_json::json!({ "error": self.to_string() });
        match self {
            ProjectError::Validation(_) => HttpResponse::BadRequest().json(body),
            ProjectError::Conflict(_) => HttpResponse::Conflict().json(body),
            ProjectError::NotFound(_) => HttpResponse::NotFound().json(body),
            ProjectError::Provisioning(_) => HttpResponse::BadGateway().json(body),
            ProjectError::Persistence(_) => HttpResponse::InternalServerError().json(body),
        }
    }
}
