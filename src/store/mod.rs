//! Local store adapter
//!
//! The store is the single source of truth on the device. Every other
//! in-memory view (queue, caches, pending counts) is rebuilt from it and kept
//! current through its change feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DataStore        - typed facade (query / save / delete / feed) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ StoreBackend     - raw JSON records per model name             │
//! │   SledBackend    - durable, sled trees + rmp-serde records     │
//! │   MemoryBackend  - ephemeral, for tests and throwaway sessions │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends publish a [`MutationEvent`] for every committed write while still
//! holding their write lock, so feed order always equals commit order. Each
//! event carries the model's commit sequence number, which lets a writer wait
//! until a feed consumer has caught up with its own write.

mod memory;
mod sled_store;

pub use memory::MemoryBackend;
pub use sled_store::{SledBackend, SledBackendConfig};

use crate::error::Result;
use crate::traits::Model;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the mutation broadcast channel
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Kind of change delivered by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl MutationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::Create => "create",
            MutationType::Update => "update",
            MutationType::Delete => "delete",
        }
    }
}

/// Untyped change notification emitted by a backend.
///
/// For deletes, `record` is the last stored value.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub model: String,
    pub mutation_type: MutationType,
    pub record: serde_json::Value,
    /// Commit sequence within `model`, starting at 1
    pub seq: u64,
}

/// Raw record storage with a change feed.
///
/// Implementations must emit exactly one [`MutationEvent`] per committed
/// write, in commit order, and must make `snapshot_and_subscribe` atomic with
/// respect to writes.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// All records of a model, in a stable order
    async fn query(&self, model: &str) -> Result<Vec<serde_json::Value>>;

    /// Insert or replace a record, returning whether it was created or updated
    async fn save(&self, model: &str, id: &str, record: serde_json::Value) -> Result<MutationType>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, model: &str, id: &str) -> Result<bool>;

    /// Query a model and subscribe to the feed with no write in between
    async fn snapshot_and_subscribe(
        &self,
        model: &str,
    ) -> Result<(Vec<serde_json::Value>, broadcast::Receiver<MutationEvent>)>;

    /// Subscribe to every mutation of every model
    fn subscribe(&self) -> broadcast::Receiver<MutationEvent>;

    /// Sequence number of the last committed write to a model, 0 if none
    async fn current_seq(&self, model: &str) -> Result<u64>;
}

/// A typed change delivered to a [`Subscription`]
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    pub mutation_type: MutationType,
    pub entity: T,
    /// Commit sequence of the write, 0 when built by hand
    pub seq: u64,
}

impl<T> Mutation<T> {
    pub fn new(mutation_type: MutationType, entity: T) -> Self {
        Self {
            mutation_type,
            entity,
            seq: 0,
        }
    }
}

/// Item read from a typed feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem<T> {
    Mutation(Mutation<T>),
    /// The receiver fell behind and missed this many events
    Lagged(u64),
}

/// Typed view of the change feed for one model.
///
/// Events for other models are skipped, undecodable records are logged and
/// skipped.
pub struct Subscription<T> {
    rx: broadcast::Receiver<MutationEvent>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Subscription<T> {
    fn new(rx: broadcast::Receiver<MutationEvent>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }

    /// Next feed item, or `None` once the store is gone
    pub async fn recv(&mut self) -> Option<FeedItem<T>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.model != T::model_name() {
                        continue;
                    }
                    match serde_json::from_value::<T>(event.record) {
                        Ok(entity) => {
                            return Some(FeedItem::Mutation(Mutation {
                                mutation_type: event.mutation_type,
                                entity,
                                seq: event.seq,
                            }))
                        }
                        Err(e) => {
                            warn!(
                                model = T::model_name(),
                                mutation = event.mutation_type.as_str(),
                                error = %e,
                                "Skipping undecodable mutation"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(FeedItem::Lagged(missed));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Sorter<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Query options for typed reads
///
/// ```rust,ignore
/// let queued = store
///     .query_with(Query::<Juvenile>::all().filter(|j| j.belongs_in_queue()))
///     .await?;
/// ```
pub struct Query<T> {
    filter: Option<Filter<T>>,
    sort: Option<Sorter<T>>,
}

impl<T> Query<T> {
    pub fn all() -> Self {
        Self {
            filter: None,
            sort: None,
        }
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(predicate));
        self
    }

    pub fn sort_by(mut self, compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Box::new(compare));
        self
    }

    fn apply(&self, mut items: Vec<T>) -> Vec<T> {
        if let Some(filter) = &self.filter {
            items.retain(|item| filter(item));
        }
        if let Some(sort) = &self.sort {
            items.sort_by(|a, b| sort(a, b));
        }
        items
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self::all()
    }
}

/// Typed facade over a [`StoreBackend`].
///
/// Cheap to clone; every component receives its own handle.
#[derive(Clone)]
pub struct DataStore {
    backend: Arc<dyn StoreBackend>,
}

impl DataStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Ephemeral store backed by [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Every stored record of `T`
    pub async fn query<T: Model>(&self) -> Result<Vec<T>> {
        let values = self.backend.query(T::model_name()).await?;
        Ok(decode_records(values))
    }

    /// Records of `T` matching a query
    pub async fn query_with<T: Model>(&self, query: Query<T>) -> Result<Vec<T>> {
        let items = self.query::<T>().await?;
        Ok(query.apply(items))
    }

    /// First record of `T` matching a predicate
    pub async fn find<T: Model>(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Option<T>> {
        let mut items = self.query_with(Query::all().filter(predicate)).await?;
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.swap_remove(0))
        })
    }

    pub async fn count<T: Model>(&self) -> Result<usize> {
        Ok(self.query::<T>().await?.len())
    }

    pub async fn save<T: Model>(&self, entity: &T) -> Result<MutationType> {
        let record = serde_json::to_value(entity)?;
        self.backend
            .save(T::model_name(), entity.model_id(), record)
            .await
    }

    pub async fn delete<T: Model>(&self, entity: &T) -> Result<bool> {
        self.backend.delete(T::model_name(), entity.model_id()).await
    }

    /// Delete every record of `T`, one feed event per record
    pub async fn clear<T: Model>(&self) -> Result<usize> {
        let items = self.query::<T>().await?;
        let mut removed = 0;
        for item in &items {
            if self.delete(item).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Typed feed for `T`
    pub fn subscribe<T: Model>(&self) -> Subscription<T> {
        Subscription::new(self.backend.subscribe())
    }

    /// Sequence number of the last committed write to `T`
    pub async fn current_seq<T: Model>(&self) -> Result<u64> {
        self.backend.current_seq(T::model_name()).await
    }

    /// Current records of `T` plus a feed starting right after them
    pub async fn snapshot_and_subscribe<T: Model>(&self) -> Result<(Vec<T>, Subscription<T>)> {
        let (values, rx) = self.backend.snapshot_and_subscribe(T::model_name()).await?;
        Ok((decode_records(values), Subscription::new(rx)))
    }
}

fn decode_records<T: Model>(values: Vec<serde_json::Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(model = T::model_name(), error = %e, "Skipping undecodable record");
                None
            }
        })
        .collect()
}
