//! convergence-core: the Realtime Model Coordinator engine.
//!
//! This crate implements per-model operational transformation for
//! collaborative JSON-like documents: the data value tree, the discrete
//! operation algebra and its transform matrix, the client- and
//! server-side concurrency controllers that rebase concurrent edits
//! against each other, the snapshot policy, the persistence contract
//! storage backends implement, and the coordinator state machine that
//! ties them together behind a single actor task per model.
//!
//! Consumers (the `convergence-server` binary crate, or any other host)
//! construct a [`coordinator::Coordinator`], call
//! [`coordinator::Coordinator::spawn`], and talk to it exclusively
//! through the returned [`coordinator::CoordinatorHandle`].

pub mod ccc;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod op;
pub mod persistence;
pub mod scc;
pub mod snapshot;
pub mod transform;
pub mod value;

pub use ccc::ClientConcurrencyController;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::{CoreError, Result};
pub use op::{AppliedOperation, CompoundOperation, DiscreteOperation, Kind, Operation};
pub use persistence::{LoadedModel, ModelMetadata, ModelOperation, Persistence, PersistenceError, Snapshot};
pub use scc::ServerConcurrencyController;
pub use snapshot::{SnapshotPolicy, SnapshotTracker};
pub use value::{DataValue, DataValueTree, ObjectValue, ValueId, VidFactory};
