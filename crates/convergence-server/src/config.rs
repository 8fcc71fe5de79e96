//! Server configuration, loaded with environment-variable overrides and
//! sane defaults (grounded on the teacher's `ChatServerConfig`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use convergence_core::config::CoordinatorConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory `FileModelStore` roots its per-model directories under.
    pub data_dir: PathBuf,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8088".parse().expect("valid default bind addr"),
            data_dir: PathBuf::from("convergence_data"),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Apply `CONVERGENCE_*` environment variable overrides on top of
    /// [`Default`], the way the teacher reads `BRAID_ROOT`/`PORT` in
    /// `lib.rs::run()`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CONVERGENCE_BIND_ADDR") {
            match addr.parse() {
                Ok(parsed) => config.bind_addr = parsed,
                Err(e) => tracing::warn!(%addr, error = %e, "ignoring invalid CONVERGENCE_BIND_ADDR"),
            }
        }
        if let Ok(dir) = std::env::var("CONVERGENCE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_u64("CONVERGENCE_HANDSHAKE_TIMEOUT_MS") {
            config.coordinator.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CONVERGENCE_DATA_REQUEST_TIMEOUT_MS") {
            config.coordinator.data_request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CONVERGENCE_LINGER_TIMEOUT_MS") {
            config.coordinator.linger_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_u64("CONVERGENCE_SNAPSHOT_TRIGGER_VERSION") {
            config.coordinator.snapshot_policy.trigger_by_version = Some(v);
        }
        if let Some(ms) = env_u64("CONVERGENCE_SNAPSHOT_TRIGGER_ELAPSED_MS") {
            config.coordinator.snapshot_policy.trigger_by_elapsed = Some(Duration::from_millis(ms));
        }

        config
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
