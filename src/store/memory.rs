//! In-memory store backend

use super::{MutationEvent, MutationType, StoreBackend, DEFAULT_FEED_CAPACITY};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, Mutex};

#[derive(Default)]
struct Tables {
    records: HashMap<String, BTreeMap<String, serde_json::Value>>,
    seqs: HashMap<String, u64>,
}

impl Tables {
    fn next_seq(&mut self, model: &str) -> u64 {
        let seq = self.seqs.entry(model.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn snapshot(&self, model: &str) -> Vec<serde_json::Value> {
        self.records
            .get(model)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Ephemeral backend. Records are kept per model in id order.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    events: broadcast::Sender<MutationEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(feed_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(feed_capacity);
        Self {
            tables: Mutex::new(Tables::default()),
            events,
        }
    }

    fn emit(&self, model: &str, mutation_type: MutationType, record: serde_json::Value, seq: u64) {
        // No receivers is fine
        let _ = self.events.send(MutationEvent {
            model: model.to_string(),
            mutation_type,
            record,
            seq,
        });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn query(&self, model: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.tables.lock().await.snapshot(model))
    }

    async fn save(&self, model: &str, id: &str, record: serde_json::Value) -> Result<MutationType> {
        let mut tables = self.tables.lock().await;
        let previous = tables
            .records
            .entry(model.to_string())
            .or_default()
            .insert(id.to_string(), record.clone());

        let mutation_type = if previous.is_some() {
            MutationType::Update
        } else {
            MutationType::Create
        };
        let seq = tables.next_seq(model);
        self.emit(model, mutation_type, record, seq);
        Ok(mutation_type)
    }

    async fn delete(&self, model: &str, id: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let removed = tables
            .records
            .get_mut(model)
            .and_then(|records| records.remove(id));

        match removed {
            Some(record) => {
                let seq = tables.next_seq(model);
                self.emit(model, MutationType::Delete, record, seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn snapshot_and_subscribe(
        &self,
        model: &str,
    ) -> Result<(Vec<serde_json::Value>, broadcast::Receiver<MutationEvent>)> {
        let tables = self.tables.lock().await;
        Ok((tables.snapshot(model), self.events.subscribe()))
    }

    fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    async fn current_seq(&self, model: &str) -> Result<u64> {
        Ok(self.tables.lock().await.seqs.get(model).copied().unwrap_or(0))
    }
}
