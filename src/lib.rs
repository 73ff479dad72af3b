//! deploydeck -- one-click remote deployment over SSH with live log streaming.
//!
//! The core is a single-flight executor: at most one deployment runs at a
//! time, its output is streamed line by line into a shared log bus, and its
//! lifecycle is tracked in a shared run state served over HTTP.

pub mod api;
pub mod config;
pub mod deploy;

use std::sync::Arc;

use anyhow::Result;

use crate::config::DeployConfig;
use crate::deploy::transport::SshConnector;
use crate::deploy::{DeployContext, Deployer};

/// Wire a [`Deployer`] to the real SSH backend.
pub fn ssh_deployer(config: &DeployConfig) -> Deployer {
    Deployer::new(
        Arc::new(DeployContext::new()),
        Arc::new(SshConnector),
        config.job(),
    )
}

/// Start the deploydeck service: HTTP API plus the background executor.
pub async fn serve(config: DeployConfig) -> Result<()> {
    // 1. Refuse to start without credentials
    config.validate()?;

    // 2. Shared context + coordinator
    let deployer = ssh_deployer(&config);
    let state = api::state::AppState::new(deployer, &config);

    // 3. Start API Server
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(state, config.server.static_dir.as_deref());

    tracing::info!(%addr, remote = %config.job().target, "deploydeck listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
