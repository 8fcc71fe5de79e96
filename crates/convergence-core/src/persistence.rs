//! Persistence Interface (`spec.md` §4.7): the contract the coordinator
//! consumes from the storage collaborator. Concrete implementations
//! (file-backed, in-memory) live outside this crate; this module defines
//! only the trait and the data it moves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::op::AppliedOperation;
use crate::value::ObjectValue;

/// Model metadata persisted alongside the tree (`spec.md` §3 "Model").
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub id: String,
    pub collection_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A single operation-log entry as the coordinator hands it to storage
/// (`spec.md` §3 "ModelOperation log entry").
#[derive(Debug, Clone)]
pub struct ModelOperation {
    pub model_id: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub op: AppliedOperation,
}

/// `(modelId, version, timestamp, root)` (`spec.md` §3 "Snapshot").
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub model_id: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub root: ObjectValue,
}

/// What [`Persistence::load_model`] returns for a model already in
/// storage: its metadata, the version of its latest snapshot, and that
/// snapshot's tree.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub metadata: ModelMetadata,
    pub latest_snapshot_version: u64,
    pub root: ObjectValue,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    #[error("model {0} already exists")]
    AlreadyExists(String),
    #[error("model {0} not found")]
    NotFound(String),
    #[error("operation log is non-dense: expected version {expected}, got {got}")]
    NonDenseAppend { expected: u64, got: u64 },
    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// The storage collaborator the coordinator depends on (`spec.md` §4.7).
/// All methods are fallible; the coordinator treats any append failure as
/// model-fatal and any read failure during Loading as fatal for that open
/// cycle (`spec.md` §7).
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_model(&self, model_id: &str) -> Result<Option<LoadedModel>>;

    /// Ordered operations for `model_id` with `version > from_version_exclusive`.
    async fn load_operations(
        &self,
        model_id: &str,
        from_version_exclusive: u64,
    ) -> Result<Vec<ModelOperation>>;

    async fn create_model(
        &self,
        model_id: &str,
        collection_id: &str,
        root: ObjectValue,
        created_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Must be atomic; fails with [`PersistenceError::NonDenseAppend`] if
    /// `op.version` does not immediately follow the highest version on
    /// disk.
    async fn append_operation(&self, op: ModelOperation) -> Result<()>;

    /// Idempotent on `(model_id, version)`.
    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Cascades to operations and snapshots.
    async fn delete_model(&self, model_id: &str) -> Result<()>;
}
