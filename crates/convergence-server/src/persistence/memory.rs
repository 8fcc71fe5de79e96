//! In-memory `Persistence` implementation used by unit/integration tests,
//! grounded on the same trait `FileModelStore` implements.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use convergence_core::op::AppliedOperation;
use convergence_core::persistence::{
    LoadedModel, ModelMetadata, ModelOperation, Persistence, PersistenceError, Result, Snapshot,
};
use convergence_core::value::ObjectValue;

struct ModelRecord {
    metadata: ModelMetadata,
    operations: Vec<ModelOperation>,
    snapshots: HashMap<u64, ObjectValue>,
    latest_snapshot_version: u64,
}

#[derive(Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<String, ModelRecord>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryModelStore {
    async fn load_model(&self, model_id: &str) -> Result<Option<LoadedModel>> {
        let models = self.models.read().await;
        let Some(record) = models.get(model_id) else {
            return Ok(None);
        };
        let root = record
            .snapshots
            .get(&record.latest_snapshot_version)
            .cloned()
            .ok_or_else(|| {
                PersistenceError::Backend(anyhow::anyhow!(
                    "missing snapshot for latest_snapshot_version"
                ))
            })?;
        Ok(Some(LoadedModel {
            metadata: record.metadata.clone(),
            latest_snapshot_version: record.latest_snapshot_version,
            root,
        }))
    }

    async fn load_operations(
        &self,
        model_id: &str,
        from_version_exclusive: u64,
    ) -> Result<Vec<ModelOperation>> {
        let models = self.models.read().await;
        let Some(record) = models.get(model_id) else {
            return Ok(Vec::new());
        };
        Ok(record
            .operations
            .iter()
            .filter(|op| op.version > from_version_exclusive)
            .cloned()
            .collect())
    }

    async fn create_model(
        &self,
        model_id: &str,
        collection_id: &str,
        root: ObjectValue,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut models = self.models.write().await;
        if models.contains_key(model_id) {
            return Err(PersistenceError::AlreadyExists(model_id.to_string()));
        }
        let mut snapshots = HashMap::new();
        snapshots.insert(0, root);
        models.insert(
            model_id.to_string(),
            ModelRecord {
                metadata: ModelMetadata {
                    id: model_id.to_string(),
                    collection_id: collection_id.to_string(),
                    created_at,
                    modified_at: created_at,
                },
                operations: Vec::new(),
                snapshots,
                latest_snapshot_version: 0,
            },
        );
        Ok(())
    }

    async fn append_operation(&self, op: ModelOperation) -> Result<()> {
        let mut models = self.models.write().await;
        let record = models
            .get_mut(&op.model_id)
            .ok_or_else(|| PersistenceError::NotFound(op.model_id.clone()))?;
        let expected = record.operations.last().map(|o| o.version + 1).unwrap_or(1);
        if op.version != expected {
            return Err(PersistenceError::NonDenseAppend {
                expected,
                got: op.version,
            });
        }
        record.metadata.modified_at = op.timestamp;
        record.operations.push(op);
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut models = self.models.write().await;
        let record = models
            .get_mut(&snapshot.model_id)
            .ok_or_else(|| PersistenceError::NotFound(snapshot.model_id.clone()))?;
        record.snapshots.insert(snapshot.version, snapshot.root);
        record.latest_snapshot_version = snapshot.version;
        record.metadata.modified_at = snapshot.timestamp;
        Ok(())
    }

    async fn delete_model(&self, model_id: &str) -> Result<()> {
        self.models.write().await.remove(model_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence_core::op::{DiscreteOperation, Kind};
    use convergence_core::value::ValueId;

    fn root() -> ObjectValue {
        ObjectValue::new(ValueId::new("s0"))
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let store = MemoryModelStore::new();
        let now = Utc::now();
        store.create_model("m1", "c1", root(), now).await.unwrap();
        let loaded = store.load_model("m1").await.unwrap().unwrap();
        assert_eq!(loaded.metadata.id, "m1");
        assert_eq!(loaded.latest_snapshot_version, 0);
    }

    #[tokio::test]
    async fn append_rejects_non_dense_version() {
        let store = MemoryModelStore::new();
        let now = Utc::now();
        store.create_model("m1", "c1", root(), now).await.unwrap();
        let op = AppliedOperation::from(DiscreteOperation::new(
            ValueId::new("s1"),
            Kind::NumberSet { value: 1.0 },
        ));
        let bad = ModelOperation {
            model_id: "m1".into(),
            version: 2,
            timestamp: now,
            session_id: "alpha".into(),
            op,
        };
        let err = store.append_operation(bad).await.unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::NonDenseAppend { expected: 1, got: 2 }
        ));
    }
}
