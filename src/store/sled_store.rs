//! Durable store backend
//!
//! One sled tree per model name, keyed by record id. Values are
//! MessagePack-encoded [`StoredRecord`]s wrapping the JSON form of the model.
//!
//! A write is committed once the tree accepts it. The feed event goes out
//! right then; the optional flush that follows can only delay durability, so
//! its failure is logged and left to sled's background flusher.

use super::{MutationEvent, MutationType, StoreBackend, DEFAULT_FEED_CAPACITY};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Configuration for the sled backend
#[derive(Debug, Clone)]
pub struct SledBackendConfig {
    /// Path to sled database
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush to disk after every write
    pub flush_on_write: bool,
    /// Capacity of the mutation feed
    pub feed_capacity: usize,
}

impl Default for SledBackendConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pbis-sync")
                .join("store.sled"),
            cache_size: 16 * 1024 * 1024, // 16MB
            flush_on_write: true,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

/// Stored record envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record id
    pub id: String,
    /// JSON form of the model
    pub data: serde_json::Value,
    /// Last modified timestamp (Unix millis)
    pub updated_at: u64,
}

/// Store backend persisted with sled
pub struct SledBackend {
    db: sled::Db,
    flush_on_write: bool,
    /// Serializes writes so feed order matches commit order; holds the
    /// per-model commit sequence
    write_lock: Mutex<HashMap<String, u64>>,
    events: broadcast::Sender<MutationEvent>,
    #[cfg(test)]
    fail_flush: AtomicBool,
}

impl SledBackend {
    pub async fn new(config: SledBackendConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_size)
            .open()?;

        let (events, _) = broadcast::channel(config.feed_capacity.max(1));

        info!(path = %config.db_path.display(), "Sled store opened");

        Ok(Self {
            db,
            flush_on_write: config.flush_on_write,
            write_lock: Mutex::new(HashMap::new()),
            events,
            #[cfg(test)]
            fail_flush: AtomicBool::new(false),
        })
    }

    /// Open a store at a specific path with default settings
    pub async fn at_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(SledBackendConfig {
            db_path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
        .await
    }

    fn tree(&self, model: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(model)?)
    }

    fn read_all(&self, model: &str) -> Result<Vec<serde_json::Value>> {
        let tree = self.tree(model)?;
        let mut records = Vec::new();
        for entry in tree.iter() {
            let (key, bytes) = entry?;
            match rmp_serde::from_slice::<StoredRecord>(&bytes) {
                Ok(stored) => records.push(stored.data),
                Err(e) => {
                    warn!(
                        model = %model,
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping unreadable record"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn persist(&self, model: &str, id: &str) {
        if !self.flush_on_write {
            return;
        }
        if let Err(e) = self.flush().await {
            warn!(model = %model, id = %id, error = %e, "Flush after write failed");
        }
    }

    async fn flush(&self) -> Result<()> {
        #[cfg(test)]
        {
            if self.fail_flush.load(Ordering::SeqCst) {
                return Err(SyncError::Persistence("flush failed".into()));
            }
        }
        self.db.flush_async().await?;
        Ok(())
    }

    fn emit(&self, model: &str, mutation_type: MutationType, record: serde_json::Value, seq: u64) {
        let _ = self.events.send(MutationEvent {
            model: model.to_string(),
            mutation_type,
            record,
            seq,
        });
    }
}

fn next_seq(seqs: &mut HashMap<String, u64>, model: &str) -> u64 {
    let seq = seqs.entry(model.to_string()).or_insert(0);
    *seq += 1;
    *seq
}

#[async_trait]
impl StoreBackend for SledBackend {
    async fn query(&self, model: &str) -> Result<Vec<serde_json::Value>> {
        self.read_all(model)
    }

    async fn save(&self, model: &str, id: &str, record: serde_json::Value) -> Result<MutationType> {
        let stored = StoredRecord {
            id: id.to_string(),
            data: record,
            updated_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };
        let bytes = rmp_serde::to_vec_named(&stored)?;

        let mut seqs = self.write_lock.lock().await;
        let previous = self.tree(model)?.insert(id.as_bytes(), bytes)?;

        let mutation_type = if previous.is_some() {
            MutationType::Update
        } else {
            MutationType::Create
        };
        let seq = next_seq(&mut seqs, model);
        debug!(model = %model, id = %id, mutation = mutation_type.as_str(), seq = seq, "Record saved");
        self.emit(model, mutation_type, stored.data, seq);

        self.persist(model, id).await;
        Ok(mutation_type)
    }

    async fn delete(&self, model: &str, id: &str) -> Result<bool> {
        let mut seqs = self.write_lock.lock().await;
        let removed = self.tree(model)?.remove(id.as_bytes())?;

        let Some(bytes) = removed else {
            return Ok(false);
        };

        let seq = next_seq(&mut seqs, model);
        debug!(model = %model, id = %id, seq = seq, "Record deleted");
        // The feed still gets the delete if the old value is unreadable
        let record = rmp_serde::from_slice::<StoredRecord>(&bytes)
            .map(|stored| stored.data)
            .unwrap_or_else(|_| serde_json::json!({ "id": id }));
        self.emit(model, MutationType::Delete, record, seq);

        self.persist(model, id).await;
        Ok(true)
    }

    async fn snapshot_and_subscribe(
        &self,
        model: &str,
    ) -> Result<(Vec<serde_json::Value>, broadcast::Receiver<MutationEvent>)> {
        let _guard = self.write_lock.lock().await;
        let records = self.read_all(model)?;
        Ok((records, self.events.subscribe()))
    }

    fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    async fn current_seq(&self, model: &str) -> Result<u64> {
        Ok(self.write_lock.lock().await.get(model).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sled_crud() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::at_path(temp_dir.path().join("test.sled"))
            .await
            .unwrap();

        let kind = backend
            .save("Location", "Gym", json!({"id": "Gym", "name": "Gym"}))
            .await
            .unwrap();
        assert_eq!(kind, MutationType::Create);

        let records = backend.query("Location").await.unwrap();
        assert_eq!(records, vec![json!({"id": "Gym", "name": "Gym"})]);

        assert!(backend.delete("Location", "Gym").await.unwrap());
        assert!(backend.query("Location").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_models_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::at_path(temp_dir.path().join("test.sled"))
            .await
            .unwrap();

        backend.save("Post", "1", json!({"id": "1"})).await.unwrap();
        backend.save("Juvenile", "1", json!({"id": "1"})).await.unwrap();

        assert_eq!(backend.query("Post").await.unwrap().len(), 1);
        assert!(backend.delete("Post", "1").await.unwrap());
        assert_eq!(backend.query("Juvenile").await.unwrap().len(), 1);
        assert_eq!(backend.current_seq("Post").await.unwrap(), 2);
        assert_eq!(backend.current_seq("Juvenile").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_still_reports_committed_write() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::at_path(temp_dir.path().join("test.sled"))
            .await
            .unwrap();
        backend.fail_flush.store(true, Ordering::SeqCst);
        let mut rx = backend.subscribe();

        let kind = backend.save("Post", "p", json!({"id": "p"})).await.unwrap();
        assert_eq!(kind, MutationType::Create);
        assert!(backend.delete("Post", "p").await.unwrap());

        let first = rx.try_recv().unwrap();
        assert_eq!((first.mutation_type, first.seq), (MutationType::Create, 1));
        let second = rx.try_recv().unwrap();
        assert_eq!((second.mutation_type, second.seq), (MutationType::Delete, 2));
        assert!(backend.query("Post").await.unwrap().is_empty());
    }
}
