//! File-backed `Persistence` implementation: one directory per model,
//! `model.json` metadata/snapshot pointer, an append-only `operations.log`
//! in the `codec` binary format, and `snapshot-<version>.bin` files —
//! grounded on the teacher's `JsonChatStore`
//! (`crates/server/src/store/json_store.rs`): same per-entity directory
//! layout and write-to-temp-then-rename durability idiom, JSON for the
//! small human-inspectable metadata file.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use convergence_core::op::codec::{self, CodecError, LogEntry};
use convergence_core::op::{AppliedOperation, Operation};
use convergence_core::persistence::{
    LoadedModel, ModelMetadata, ModelOperation, Persistence, PersistenceError, Result, Snapshot,
};
use convergence_core::value::{DataValue, ObjectValue};

#[derive(Debug, Serialize, Deserialize)]
struct ModelManifest {
    id: String,
    collection_id: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    latest_snapshot_version: u64,
}

/// Roots all model directories under `base_dir`. Per-model writes are
/// serialized through a lazily-created mutex so `operations.log` appends
/// and `model.json` renames from concurrent submissions never interleave.
pub struct FileModelStore {
    base_dir: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileModelStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn model_dir(&self, model_id: &str) -> PathBuf {
        self.base_dir.join(model_id)
    }

    fn manifest_path(&self, model_id: &str) -> PathBuf {
        self.model_dir(model_id).join("model.json")
    }

    fn operations_path(&self, model_id: &str) -> PathBuf {
        self.model_dir(model_id).join("operations.log")
    }

    fn snapshot_path(&self, model_id: &str, version: u64) -> PathBuf {
        self.model_dir(model_id).join(format!("snapshot-{version}.bin"))
    }

    async fn lock_for(&self, model_id: &str) -> Arc<Mutex<()>> {
        if let Some(l) = self.locks.read().await.get(model_id) {
            return l.clone();
        }
        self.locks
            .write()
            .await
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_manifest(&self, model_id: &str) -> Result<Option<ModelManifest>> {
        match fs::read(self.manifest_path(model_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PersistenceError::Backend(e.into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Backend(e.into())),
        }
    }

    async fn write_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let path = self.manifest_path(&manifest.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| PersistenceError::Backend(e.into()))?;
        fs::write(&tmp, &json).await.map_err(|e| PersistenceError::Backend(e.into()))?;
        fs::rename(&tmp, &path).await.map_err(|e| PersistenceError::Backend(e.into()))?;
        Ok(())
    }

    async fn write_snapshot_file(
        &self,
        model_id: &str,
        version: u64,
        timestamp: DateTime<Utc>,
        root: &ObjectValue,
    ) -> Result<()> {
        let bytes = encode_snapshot(version, timestamp, root);
        let path = self.snapshot_path(model_id, version);
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).await.map_err(|e| PersistenceError::Backend(e.into()))?;
        fs::rename(&tmp, &path).await.map_err(|e| PersistenceError::Backend(e.into()))?;
        Ok(())
    }

    async fn read_snapshot_file(&self, model_id: &str, version: u64) -> Result<ObjectValue> {
        let bytes = fs::read(self.snapshot_path(model_id, version))
            .await
            .map_err(|e| PersistenceError::Backend(e.into()))?;
        decode_snapshot(&bytes).map_err(|e| PersistenceError::Backend(anyhow::anyhow!(e.to_string())))
    }

    /// Scan the whole operations log. Framed with a `u32` length prefix per
    /// entry so individually variable-length [`LogEntry`] encodings can be
    /// split back apart; the length prefix is a file-storage detail, not
    /// part of the on-wire log-entry format itself.
    async fn read_operations_log(&self, model_id: &str) -> Result<Vec<LogEntry>> {
        let bytes = match fs::read(self.operations_path(model_id)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::Backend(e.into())),
        };

        let mut cursor = 0usize;
        let mut entries = Vec::new();
        while cursor < bytes.len() {
            if cursor + 4 > bytes.len() {
                return Err(PersistenceError::Backend(anyhow::anyhow!(
                    "operations.log truncated mid-frame"
                )));
            }
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                return Err(PersistenceError::Backend(anyhow::anyhow!(
                    "operations.log truncated mid-entry"
                )));
            }
            let entry = codec::decode_log_entry(&bytes[cursor..cursor + len])
                .map_err(|e| PersistenceError::Backend(anyhow::anyhow!(e.to_string())))?;
            cursor += len;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn highest_logged_version(&self, model_id: &str) -> Result<u64> {
        Ok(self
            .read_operations_log(model_id)
            .await?
            .last()
            .map(|e| e.version)
            .unwrap_or(0))
    }
}

#[async_trait]
impl Persistence for FileModelStore {
    async fn load_model(&self, model_id: &str) -> Result<Option<LoadedModel>> {
        let Some(manifest) = self.read_manifest(model_id).await? else {
            return Ok(None);
        };
        let root = self
            .read_snapshot_file(model_id, manifest.latest_snapshot_version)
            .await?;
        Ok(Some(LoadedModel {
            metadata: ModelMetadata {
                id: manifest.id,
                collection_id: manifest.collection_id,
                created_at: manifest.created_at,
                modified_at: manifest.modified_at,
            },
            latest_snapshot_version: manifest.latest_snapshot_version,
            root,
        }))
    }

    async fn load_operations(
        &self,
        model_id: &str,
        from_version_exclusive: u64,
    ) -> Result<Vec<ModelOperation>> {
        let entries = self.read_operations_log(model_id).await?;
        entries
            .into_iter()
            .filter(|e| e.version > from_version_exclusive)
            .map(|e| {
                let discrete = match e.op {
                    Operation::Discrete(d) => d,
                    Operation::Compound(_) => {
                        return Err(PersistenceError::Backend(anyhow::anyhow!(
                            "compound entries are not expected in the operation log"
                        )))
                    }
                };
                Ok(ModelOperation {
                    model_id: model_id.to_string(),
                    version: e.version,
                    timestamp: e.timestamp,
                    session_id: e.session_id,
                    op: AppliedOperation::from(discrete),
                })
            })
            .collect()
    }

    async fn create_model(
        &self,
        model_id: &str,
        collection_id: &str,
        root: ObjectValue,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.lock_for(model_id).await;
        let _guard = lock.lock().await;

        let dir = self.model_dir(model_id);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(PersistenceError::AlreadyExists(model_id.to_string()));
        }
        fs::create_dir_all(&dir).await.map_err(|e| PersistenceError::Backend(e.into()))?;

        self.write_snapshot_file(model_id, 0, created_at, &root).await?;
        self.write_manifest(&ModelManifest {
            id: model_id.to_string(),
            collection_id: collection_id.to_string(),
            created_at,
            modified_at: created_at,
            latest_snapshot_version: 0,
        })
        .await?;

        info!(model_id, "model created on disk");
        Ok(())
    }

    async fn append_operation(&self, op: ModelOperation) -> Result<()> {
        let lock = self.lock_for(&op.model_id).await;
        let _guard = lock.lock().await;

        let current = self.highest_logged_version(&op.model_id).await?;
        if op.version != current + 1 {
            return Err(PersistenceError::NonDenseAppend {
                expected: current + 1,
                got: op.version,
            });
        }

        let entry = LogEntry {
            version: op.version,
            timestamp: op.timestamp,
            session_id: op.session_id,
            op: Operation::Discrete(op.op.to_discrete()),
        };
        let payload = codec::encode_log_entry(&entry);
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed
            .write_u32::<LittleEndian>(payload.len() as u32)
            .expect("write to Vec never fails");
        framed.extend_from_slice(&payload);

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.operations_path(&op.model_id))
            .await
            .map_err(|e| PersistenceError::Backend(e.into()))?;
        file.write_all(&framed).await.map_err(|e| PersistenceError::Backend(e.into()))?;
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let lock = self.lock_for(&snapshot.model_id).await;
        let _guard = lock.lock().await;

        self.write_snapshot_file(&snapshot.model_id, snapshot.version, snapshot.timestamp, &snapshot.root)
            .await?;
        if let Some(mut manifest) = self.read_manifest(&snapshot.model_id).await? {
            manifest.latest_snapshot_version = snapshot.version;
            manifest.modified_at = snapshot.timestamp;
            self.write_manifest(&manifest).await?;
        }
        Ok(())
    }

    async fn delete_model(&self, model_id: &str) -> Result<()> {
        let lock = self.lock_for(model_id).await;
        let _guard = lock.lock().await;
        match fs::remove_dir_all(self.model_dir(model_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Backend(e.into())),
        }
    }
}

/// `version:u64 LE, timestampMillis:i64 LE, <DataValue encoding of the
/// root object>` — reuses [`codec::encode_data_value`] as `spec.md` §6's
/// "Snapshot format" note describes.
fn encode_snapshot(version: u64, timestamp: DateTime<Utc>, root: &ObjectValue) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(version).expect("write to Vec never fails");
    buf.write_i64::<LittleEndian>(timestamp.timestamp_millis())
        .expect("write to Vec never fails");
    codec::encode_data_value(&DataValue::Object(root.clone()), &mut buf);
    buf
}

fn decode_snapshot(bytes: &[u8]) -> std::result::Result<ObjectValue, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let _version = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| CodecError::Eof("snapshot version"))?;
    let millis = cursor
        .read_i64::<LittleEndian>()
        .map_err(|_| CodecError::Eof("snapshot timestamp"))?;
    let _timestamp = Utc.timestamp_millis_opt(millis).single();
    match codec::decode_data_value(&mut cursor)? {
        DataValue::Object(o) => Ok(o),
        _ => Err(CodecError::UnknownDataValueTag(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence_core::op::{DiscreteOperation, Kind};
    use convergence_core::value::ValueId;
    use tempfile::TempDir;

    fn root() -> ObjectValue {
        ObjectValue::new(ValueId::new("s0"))
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::new(dir.path());
        let now = Utc::now();
        store.create_model("m1", "c1", root(), now).await.unwrap();

        let loaded = store.load_model("m1").await.unwrap().unwrap();
        assert_eq!(loaded.metadata.id, "m1");
        assert_eq!(loaded.latest_snapshot_version, 0);
    }

    #[tokio::test]
    async fn append_then_reload_operations() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::new(dir.path());
        let now = Utc::now();
        store.create_model("m1", "c1", root(), now).await.unwrap();

        let applied = AppliedOperation::from(DiscreteOperation::new(
            ValueId::new("s0"),
            Kind::ObjectAddProperty {
                property: "x".into(),
                value: DataValue::new_double(ValueId::new("s1"), 1.0),
            },
        ));
        store
            .append_operation(ModelOperation {
                model_id: "m1".into(),
                version: 1,
                timestamp: now,
                session_id: "alpha".into(),
                op: applied,
            })
            .await
            .unwrap();

        let ops = store.load_operations("m1", 0).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].version, 1);
    }

    #[tokio::test]
    async fn append_rejects_non_dense_version() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::new(dir.path());
        let now = Utc::now();
        store.create_model("m1", "c1", root(), now).await.unwrap();

        let applied = AppliedOperation::from(DiscreteOperation::new(
            ValueId::new("s0"),
            Kind::NumberSet { value: 1.0 },
        ));
        let err = store
            .append_operation(ModelOperation {
                model_id: "m1".into(),
                version: 5,
                timestamp: now,
                session_id: "alpha".into(),
                op: applied,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::NonDenseAppend { expected: 1, got: 5 }
        ));
    }
}
