//! PBIS Sync - offline-first sync core for the PBIS scanner
//!
//! Keeps a scanner device useful without a network: reference data and
//! juveniles live in a local store, the scan queue is derived from it, and
//! behavior submissions are stored as posts and uploaded when the backend is
//! reachable.
//!
//! # Architecture
//!
//! - **Store**: local source of truth with a change feed (sled or in-memory)
//! - **Reconcile**: aligns stored records with the backend's listings
//! - **Queue**: ordered set of enqueued, active juveniles, driven by the feed
//! - **Outbox**: durable posts flushed with bounded parallelism
//! - **Coordinator**: reacts to connectivity and exposes the UI commands
//!
//! # Example
//!
//! ```rust,ignore
//! use pbis_sync::{Config, ConnectivityMonitor, ScannerCore, StaticCredentials};
//! use std::sync::Arc;
//!
//! let config = Config::load("config.toml")?;
//! let connectivity = ConnectivityMonitor::new(true);
//! let core = ScannerCore::open(
//!     &config,
//!     Arc::new(StaticCredentials::new(token)),
//!     connectivity.clone(),
//! )
//! .await?;
//! core.start().await?;
//!
//! let scan = core.scan_code(10010).await?;
//! let report = core.submit(&core.queue().members(), &behavior).await;
//! ```

// Core traits for persisted models
pub mod traits;

// Persisted record types
pub mod models;

// Local store and change feed
pub mod store;

// Remote API seam and endpoints
pub mod api;

// Credential provider seam
pub mod auth;

// Online/offline flag
pub mod connectivity;

// User-facing notifications
pub mod events;

// Local/remote reconciliation
pub mod reconcile;

// Scan queue
pub mod queue;

// Pending posts
pub mod outbox;

// Behavior selection state
pub mod selection;

// Component wiring and UI commands
pub mod coordinator;

// Configuration
pub mod config;

// Error types
pub mod error;

// Re-export core traits
pub use traits::{Model, RemoteModel};

// Re-export models
pub use models::{Behavior, Category, Juvenile, Location, Post, Purchase};

// Re-export store types
pub use store::{
    DataStore, FeedItem, MemoryBackend, Mutation, MutationEvent, MutationType, Query,
    SledBackend, SledBackendConfig, StoreBackend, Subscription,
};

// Re-export API types
pub use api::{Endpoint, EndpointDescriptor, HttpMethod, RemoteApi};
#[cfg(feature = "client")]
pub use api::{HttpApiClient, HttpApiConfig};

pub use auth::{CredentialsProvider, StaticCredentials};
pub use connectivity::ConnectivityMonitor;
pub use events::{EventBus, Notification};

// Re-export sync components
pub use coordinator::{ScannerCore, SubmitReport};
pub use outbox::{FlushResult, Outbox, OutboxConfig};
pub use queue::{QueueChange, QueueTracker, RemoveAllReport};
pub use reconcile::{Activity, ReconcileReport, ReconciliationEngine, ReferenceEntity, ScanResult};
pub use selection::BehaviorSelection;

pub use config::Config;

// Re-export error types
pub use error::{Result, SyncError};
