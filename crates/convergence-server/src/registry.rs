//! In-process registry of live coordinators, one per open model
//! (grounded on the teacher's `ResourceStateManager`
//! (`crates/braid-core/src/core/server/resource_state.rs`): an
//! `Arc<Mutex<HashMap<...>>>` keyed by id, with a broadcast channel
//! announcing newly-created entries to interested subscribers).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use convergence_core::coordinator::{Coordinator, CoordinatorHandle};
use convergence_core::persistence::Persistence;
use convergence_core::CoordinatorConfig;

/// Owns the set of currently-spawned coordinator tasks and hands out
/// handles to them, spawning a fresh one on first open and again whenever
/// the previous one has shut down (e.g. after its linger timeout).
pub struct ModelRegistry {
    coordinators: Arc<Mutex<HashMap<String, CoordinatorHandle>>>,
    opened_tx: broadcast::Sender<String>,
    persistence: Arc<dyn Persistence>,
    config: CoordinatorConfig,
}

impl ModelRegistry {
    pub fn new(persistence: Arc<dyn Persistence>, config: CoordinatorConfig) -> Self {
        let (opened_tx, _) = broadcast::channel(1024);
        Self {
            coordinators: Arc::new(Mutex::new(HashMap::new())),
            opened_tx,
            persistence,
            config,
        }
    }

    pub fn subscribe_opened(&self) -> broadcast::Receiver<String> {
        self.opened_tx.subscribe()
    }

    pub fn list_open(&self) -> Vec<String> {
        self.coordinators.lock().keys().cloned().collect()
    }

    /// Return the handle for `model_id`, spawning a coordinator for it if
    /// none is registered. `collection_id` only matters for a genuinely new
    /// model; an already-running coordinator keeps its own.
    pub fn handle_for(&self, model_id: &str, collection_id: &str) -> CoordinatorHandle {
        let mut coordinators = self.coordinators.lock();
        if let Some(handle) = coordinators.get(model_id) {
            return handle.clone();
        }

        let coordinator = Coordinator::new(
            model_id.to_string(),
            collection_id.to_string(),
            self.config.clone(),
            self.persistence.clone(),
        );
        let handle = coordinator.spawn();
        coordinators.insert(model_id.to_string(), handle.clone());
        let _ = self.opened_tx.send(model_id.to_string());
        info!(model_id, "spawned coordinator");
        handle
    }

    /// Drop a model's entry, e.g. after `ModelDeleted` is delivered. The
    /// coordinator task itself decides when to actually stop; this only
    /// stops the registry from handing out the (now-dead) handle.
    pub fn forget(&self, model_id: &str) {
        self.coordinators.lock().remove(model_id);
    }
}
