//! Scanner core: wires the sync components together.
//!
//! Owns the reconciliation engine, the scan queue and the outbox, reacts to
//! connectivity coming back, and exposes the commands the UI issues.
//! Every collaborator is passed in at construction.

use crate::api::RemoteApi;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, Notification};
use crate::models::{Behavior, Juvenile, Location, Purchase};
use crate::outbox::{FlushResult, Outbox, OutboxConfig};
use crate::queue::{QueueTracker, RemoveAllReport};
use crate::reconcile::{ReconciliationEngine, ScanResult};
use crate::store::DataStore;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of a submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Posts stored for upload
    pub queued: usize,
    /// Juveniles whose post could not be stored; they stay queued
    pub failed: usize,
    /// Posts stored but the juvenile could not be taken off the queue
    pub not_removed: usize,
    /// Flush attempted right after, when online
    pub flush: Option<FlushResult>,
}

/// Offline-first sync core of the scanner app
pub struct ScannerCore {
    engine: Arc<ReconciliationEngine>,
    queue: Arc<QueueTracker>,
    outbox: Arc<Outbox>,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ScannerCore {
    pub fn new(
        store: DataStore,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        events: EventBus,
        outbox_config: OutboxConfig,
    ) -> Self {
        let engine = ReconciliationEngine::new(
            store.clone(),
            Arc::clone(&api),
            connectivity.clone(),
            events.clone(),
        );
        let queue = QueueTracker::new(store.clone(), events.clone());
        let outbox = Outbox::new(store, api, connectivity.clone(), outbox_config);

        Self {
            engine: Arc::new(engine),
            queue: Arc::new(queue),
            outbox: Arc::new(outbox),
            connectivity,
            events,
            watcher: Mutex::new(None),
        }
    }

    /// Build a core on the sled store and the HTTP client
    #[cfg(feature = "client")]
    pub async fn open(
        config: &crate::config::Config,
        credentials: Arc<dyn crate::auth::CredentialsProvider>,
        connectivity: ConnectivityMonitor,
    ) -> Result<Self> {
        config.validate()?;
        let backend = crate::store::SledBackend::new(config.store_config()).await?;
        let api = crate::api::HttpApiClient::new(
            config.http_config(),
            credentials,
            connectivity.clone(),
        )?;

        Ok(Self::new(
            DataStore::new(Arc::new(backend)),
            Arc::new(api),
            connectivity,
            EventBus::new(config.event_capacity),
            config.outbox_config(),
        ))
    }

    /// Restore local state, load reference data and start watching
    /// connectivity.
    pub async fn start(&self) -> Result<()> {
        self.queue.initialize().await?;
        self.outbox.start().await?;

        if let Err(e) = self.engine.sync_reference_entities::<Location>().await {
            warn!(error = %e, "Location sync failed");
        }
        if let Err(e) = self.engine.sync_reference_entities::<Behavior>().await {
            warn!(error = %e, "Behavior sync failed");
        }

        if self.connectivity.is_online() {
            on_reconnect(&self.engine, &self.outbox).await;
        }

        let handle = tokio::spawn(watch_connectivity(
            self.connectivity.subscribe(),
            Arc::clone(&self.engine),
            Arc::clone(&self.outbox),
        ));
        if let Some(previous) = self.lock_watcher().replace(handle) {
            previous.abort();
        }

        info!(
            queued = self.queue.len(),
            pending = self.outbox.pending_count(),
            online = self.connectivity.is_online(),
            "Scanner core started"
        );
        Ok(())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Handle a scanned event code
    pub async fn scan_code(&self, event_id: i64) -> Result<ScanResult> {
        let result = self.engine.fetch_by_event_code(event_id).await;
        if let Err(SyncError::NotFound(_)) = &result {
            self.events.publish(Notification::NotFound { event_id });
        }
        result
    }

    /// The user accepted the reactivation prompt
    pub async fn confirm_reactivation(&self, event_id: i64) -> Result<Juvenile> {
        self.engine.activate(event_id).await
    }

    /// Submit a behavior for each juvenile.
    ///
    /// The post is stored before the juvenile leaves the queue. A juvenile
    /// whose post could not be stored stays queued.
    pub async fn submit(&self, juveniles: &[Juvenile], behavior: &Behavior) -> SubmitReport {
        let mut report = SubmitReport::default();

        for juvenile in juveniles {
            if let Err(e) = self.outbox.enqueue(juvenile.id.clone(), behavior.id.clone()).await {
                warn!(id = %juvenile.id, error = %e, "Failed to store post");
                report.failed += 1;
                self.events.publish(Notification::SubmissionFailed {
                    name: juvenile.first_name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
            report.queued += 1;

            if let Err(e) = self.queue.remove(juvenile).await {
                warn!(id = %juvenile.id, error = %e, "Submitted juvenile stays queued");
                report.not_removed += 1;
            }
        }

        if report.queued > 0 {
            self.events.publish(Notification::Submitted {
                count: report.queued,
            });
        }

        if self.connectivity.is_online() {
            match self.outbox.flush().await {
                Ok(result) => report.flush = Some(result),
                Err(e) => debug!(error = %e, "Flush after submit skipped"),
            }
        }

        info!(
            queued = report.queued,
            failed = report.failed,
            not_removed = report.not_removed,
            "Submission finished"
        );
        report
    }

    pub async fn remove_from_queue(&self, juvenile: &Juvenile) -> Result<()> {
        self.queue.remove(juvenile).await
    }

    pub async fn clear_queue(&self) -> RemoveAllReport {
        self.queue.remove_all().await
    }

    /// Explicit retry from the UI
    pub async fn retry_uploads(&self) -> Result<FlushResult> {
        self.outbox.flush().await
    }

    /// The app came back to the foreground
    pub async fn on_foreground(&self) -> Option<FlushResult> {
        if !self.connectivity.is_online() {
            return None;
        }
        match self.outbox.flush().await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Foreground flush failed");
                None
            }
        }
    }

    pub async fn juvenile_history(&self, juvenile_id: &str) -> Result<Vec<Purchase>> {
        self.engine.juvenile_history(juvenile_id).await
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn queue(&self) -> &QueueTracker {
        &self.queue
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn queue_members(&self) -> watch::Receiver<Vec<Juvenile>> {
        self.queue.subscribe()
    }

    pub fn pending_uploads(&self) -> watch::Receiver<usize> {
        self.outbox.subscribe_pending()
    }

    /// Stop every background task
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_watcher().take() {
            handle.abort();
        }
        self.queue.shutdown();
        self.outbox.shutdown();
        info!("Scanner core stopped");
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ScannerCore {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_watcher().take() {
            handle.abort();
        }
    }
}

/// Run the reconnect pass on every offline to online transition
async fn watch_connectivity(
    mut online_rx: watch::Receiver<bool>,
    engine: Arc<ReconciliationEngine>,
    outbox: Arc<Outbox>,
) {
    let mut was_online = *online_rx.borrow_and_update();

    while online_rx.changed().await.is_ok() {
        let online = *online_rx.borrow_and_update();
        if online && !was_online {
            info!("Back online, syncing");
            on_reconnect(&engine, &outbox).await;
        }
        was_online = online;
    }
}

/// Refresh reference data and juveniles, then flush. Failures are logged only.
async fn on_reconnect(engine: &ReconciliationEngine, outbox: &Outbox) {
    if let Err(e) = engine.refresh_reference_entities::<Location>().await {
        warn!(error = %e, "Location refresh failed");
    }
    if let Err(e) = engine.refresh_reference_entities::<Behavior>().await {
        warn!(error = %e, "Behavior refresh failed");
    }
    if let Err(e) = engine.refresh_juveniles().await {
        warn!(error = %e, "Juvenile refresh failed");
    }
    match outbox.flush().await {
        Ok(result) if result.failed > 0 => {
            warn!(failed = result.failed, remaining = result.remaining, "Some posts not uploaded")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Flush failed"),
    }
}
