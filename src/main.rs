// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! pvedash: simplified REST API over Proxmox VE
//!
//! - Groups LXC containers into projects with optional VMID ranges
//! - Gives a project its own SDN zone, VNet and DHCP subnet
//! - Tracks which container belongs to which project

mod api;
mod config;
mod error;
mod netcalc;
mod projects;
mod proxmox;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use projects::orchestrator::Orchestrator;
use projects::store::ProjectStore;

/// pvedash: Proxmox VE project dashboard
#[derive(Parser)]
#[command(name = "pvedash", version, about = "Project and network management for Proxmox VE")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8554)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Config file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Projects file (overrides [projects].data_file)
    #[arg(long)]
    data_file: Option<String>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["pvedash=info", "actix_web=info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut cfg = config::Config::load(&cli.config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if let Some(path) = cli.data_file {
        cfg.projects.data_file = path;
    }

    info!("");
    info!("  pvedash v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Proxmox:    {}:{} (node {})", cfg.proxmox.address, cfg.proxmox.port, cfg.proxmox.node);
    let store = ProjectStore::open(&cfg.projects.data_file)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!("  Projects:   {}", store.path().display());
    info!("  API:        http://{}:{}", cli.bind, cli.port);

    let pve = Arc::new(proxmox::PveClient::new(
        &cfg.proxmox.address,
        cfg.proxmox.port,
        &cfg.proxmox.token,
        &cfg.proxmox.node,
    ));
    // Best effort: the dashboard still starts if PVE is down
    match pve.test_connection().await {
        Ok(version) => info!("  Connected:  {}", version),
        Err(e) => warn!("  Proxmox unreachable: {}", e),
    }
    info!("");

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store),
        pve.clone(),
        pve,
        cfg.projects.sdn_settings(),
    ));
    let app_state = web::Data::new(api::AppState { projects: orchestrator });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(api::configure)
    })
    .bind(format!("{}:{}", cli.bind, cli.port))?
    .run()
    .await
}
