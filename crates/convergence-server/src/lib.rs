//! Convergence Server application shell: configuration, the in-process
//! model registry, file-backed persistence, and a minimal Axum gateway
//! that exercises the Realtime Model Coordinator end-to-end.

pub mod config;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod registry;

pub use config::ServerConfig;
pub use error::{ServerError, Result};
pub use registry::ModelRegistry;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing and serve the gateway until the process is killed
/// (grounded on the teacher's `lib.rs::run()`).
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    config.ensure_dirs().await?;
    info!(data_dir = ?config.data_dir, bind_addr = %config.bind_addr, "starting convergence-server");

    let store = Arc::new(persistence::FileModelStore::new(config.data_dir.clone()));
    let registry = Arc::new(ModelRegistry::new(store, config.coordinator.clone()));

    let app = gateway::router(gateway::AppState { registry });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
