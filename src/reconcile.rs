//! Reconciliation engine
//!
//! Keeps the local store aligned with the backend's listings without losing
//! local-only state, and without assuming the network is up.
//!
//! ## Rules
//!
//! - A remote entity whose natural key is missing locally is created.
//! - A local entity missing from a **non-empty** remote listing is deleted.
//!   An empty listing deletes nothing, since connectivity blips produce them.
//! - An entity on both sides is updated when the merged value differs.
//!   [`Model::merge_remote`] decides which local fields survive.
//! - Local records sharing a natural key are collapsed onto the first one;
//!   the others are deleted along with the missing ones.
//!
//! Running a pass twice with the same inputs changes nothing the second time.

use crate::api::{fetch_listing, request_as, Endpoint, RemoteApi};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, Notification};
use crate::models::{Behavior, Juvenile, Location, Purchase};
use crate::store::DataStore;
use crate::traits::{Model, RemoteModel};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// =============================================================================
// Reference entities
// =============================================================================

/// In-memory mirrors of the reference data, rebuilt from the store
#[derive(Debug, Default)]
pub struct ReferenceCache {
    locations: RwLock<Vec<Location>>,
    behaviors: RwLock<Vec<Behavior>>,
}

/// Remote models cached in memory for the selection UI.
pub trait ReferenceEntity: RemoteModel {
    /// The cache slot for this type
    fn cache(caches: &ReferenceCache) -> &RwLock<Vec<Self>>;

    /// Fill local-only relationships before persisting a remote entity.
    /// Returning `None` rejects it for this pass.
    fn resolve(self, _known_locations: &[Location]) -> Option<Self> {
        Some(self)
    }
}

impl ReferenceEntity for Location {
    fn cache(caches: &ReferenceCache) -> &RwLock<Vec<Self>> {
        &caches.locations
    }
}

impl ReferenceEntity for Behavior {
    fn cache(caches: &ReferenceCache) -> &RwLock<Vec<Self>> {
        &caches.behaviors
    }

    /// Behaviors only carry a location name; it must match a stored location.
    fn resolve(mut self, known_locations: &[Location]) -> Option<Self> {
        let location = known_locations
            .iter()
            .find(|l| l.name == self.location.name)?;
        self.location = location.clone();
        Some(self)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Remote entities rejected by the resolver
    pub skipped: usize,
    /// Store writes that failed; retried on the next pass
    pub failed: usize,
}

impl ReconcileReport {
    /// Number of store writes performed
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Whether a scanned juvenile can be queued right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    /// Needs reactivation before it can be queued
    Inactive,
}

/// Result of a scan lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub juvenile: Juvenile,
    pub activity: Activity,
}

// =============================================================================
// Engine
// =============================================================================

/// Reconciles reference data and juveniles against the backend
pub struct ReconciliationEngine {
    store: DataStore,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    caches: ReferenceCache,
}

impl ReconciliationEngine {
    pub fn new(
        store: DataStore,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            events,
            caches: ReferenceCache::default(),
        }
    }

    /// Load reference entities, fetching them only when nothing is stored.
    ///
    /// With local data present the network is not touched. An empty store
    /// while offline yields an empty list.
    pub async fn sync_reference_entities<T: ReferenceEntity>(&self) -> Result<Vec<T>> {
        let locals = self.store.query::<T>().await?;
        if !locals.is_empty() {
            debug!(model = T::model_name(), count = locals.len(), "Using stored reference data");
            *T::cache(&self.caches).write().await = locals.clone();
            return Ok(locals);
        }

        if !self.connectivity.is_online() {
            debug!(model = T::model_name(), "No stored reference data while offline");
            return Ok(Vec::new());
        }

        let remotes = fetch_listing::<T>(self.api.as_ref()).await?;
        let known_locations = self.store.query::<Location>().await?;
        let report = self
            .reconcile_list_with(Vec::new(), remotes, |e: T| e.resolve(&known_locations))
            .await;
        info!(
            model = T::model_name(),
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "Reference data seeded"
        );

        self.rebuild_cache::<T>().await
    }

    /// Reconcile stored reference entities against a fresh remote listing
    pub async fn refresh_reference_entities<T: ReferenceEntity>(&self) -> Result<ReconcileReport> {
        self.ensure_online()?;

        let remotes = fetch_listing::<T>(self.api.as_ref()).await?;
        let locals = self.store.query::<T>().await?;
        let known_locations = self.store.query::<Location>().await?;
        let report = self
            .reconcile_list_with(locals, remotes, |e: T| e.resolve(&known_locations))
            .await;

        self.rebuild_cache::<T>().await?;
        Ok(report)
    }

    /// Reconcile stored juveniles against the full remote listing.
    ///
    /// Local queue membership survives; the queue tracker picks up the
    /// resulting store mutations.
    pub async fn refresh_juveniles(&self) -> Result<ReconcileReport> {
        self.ensure_online()?;

        let remotes = fetch_listing::<Juvenile>(self.api.as_ref()).await?;
        let locals = self.store.query::<Juvenile>().await?;
        Ok(self.reconcile_list(locals, remotes).await)
    }

    /// Reconcile with no resolver
    pub async fn reconcile_list<T: Model>(&self, locals: Vec<T>, remotes: Vec<T>) -> ReconcileReport {
        self.reconcile_list_with(locals, remotes, Some).await
    }

    /// Apply one reconciliation pass to the store.
    ///
    /// `resolve` prepares each remote entity before it is written and may
    /// reject it. Store failures are counted, never fatal.
    pub async fn reconcile_list_with<T, F>(
        &self,
        locals: Vec<T>,
        remotes: Vec<T>,
        resolve: F,
    ) -> ReconcileReport
    where
        T: Model,
        F: Fn(T) -> Option<T>,
    {
        let mut report = ReconcileReport::default();
        let remote_was_empty = remotes.is_empty();

        let mut local_by_key: HashMap<String, &T> = HashMap::with_capacity(locals.len());
        let mut duplicates = Vec::new();
        for local in &locals {
            match local_by_key.entry(local.natural_key()) {
                Entry::Vacant(slot) => {
                    slot.insert(local);
                }
                Entry::Occupied(_) => duplicates.push(local),
            }
        }
        let mut remote_keys = HashSet::with_capacity(remotes.len());

        for remote in remotes {
            let key = remote.natural_key();
            if !remote_keys.insert(key.clone()) {
                debug!(model = T::model_name(), key = %key, "Duplicate key in remote listing");
                continue;
            }

            let Some(resolved) = resolve(remote) else {
                report.skipped += 1;
                continue;
            };

            match local_by_key.get(&key) {
                None => match self.store.save(&resolved).await {
                    Ok(_) => report.created += 1,
                    Err(e) => {
                        warn!(model = T::model_name(), key = %key, error = %e, "Failed to create record");
                        report.failed += 1;
                    }
                },
                Some(local) => {
                    let merged = T::merge_remote(resolved, local);
                    if merged == **local {
                        continue;
                    }
                    match self.store.save(&merged).await {
                        Ok(_) => report.updated += 1,
                        Err(e) => {
                            warn!(model = T::model_name(), key = %key, error = %e, "Failed to update record");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if remote_was_empty {
            if !locals.is_empty() {
                warn!(
                    model = T::model_name(),
                    local = locals.len(),
                    "Empty remote listing, keeping local records"
                );
            }
        } else {
            let missing = local_by_key
                .iter()
                .filter(|(key, _)| !remote_keys.contains(*key))
                .map(|(_, local)| *local);
            let stale: Vec<&T> = duplicates.into_iter().chain(missing).collect();
            for local in stale {
                match self.store.delete(local).await {
                    Ok(true) => report.deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(model = T::model_name(), id = %local.model_id(), error = %e, "Failed to delete record");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.changes() > 0 || report.failed > 0 {
            info!(
                model = T::model_name(),
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                skipped = report.skipped,
                failed = report.failed,
                "Reconciled"
            );
        }
        report
    }

    /// Look up a scanned event code, locally first.
    ///
    /// An active juvenile is queued. An inactive one is stored unchanged and
    /// a [`Notification::ReactivationPrompt`] is published.
    pub async fn fetch_by_event_code(&self, event_id: i64) -> Result<ScanResult> {
        let local = self
            .store
            .find::<Juvenile>(move |j| j.event_id == event_id)
            .await?;

        let mut juvenile = match local {
            Some(juvenile) => juvenile,
            None => {
                if !self.connectivity.is_online() {
                    debug!(event_id = event_id, "Local miss while offline");
                    return Err(SyncError::NotConnected);
                }
                let remote = self
                    .fetch_remote_juvenile(event_id)
                    .await?
                    .ok_or_else(|| not_found(event_id))?;
                self.merge_with_stored(remote).await?
            }
        };

        let activity = if juvenile.is_active() {
            juvenile.is_enqueued = true;
            Activity::Active
        } else {
            Activity::Inactive
        };
        self.store.save(&juvenile).await?;

        if activity == Activity::Inactive {
            info!(event_id = event_id, id = %juvenile.id, "Scanned juvenile is inactive");
            self.events.publish(Notification::ReactivationPrompt {
                event_id,
                name: juvenile.first_name.clone(),
            });
        }

        Ok(ScanResult { juvenile, activity })
    }

    /// Reactivate a juvenile on the backend, then queue it locally.
    ///
    /// Nothing local changes unless the backend accepted the activation.
    pub async fn activate(&self, event_id: i64) -> Result<Juvenile> {
        self.ensure_online()?;

        let local = self
            .store
            .find::<Juvenile>(move |j| j.event_id == event_id)
            .await?
            .ok_or_else(|| not_found(event_id))?;

        self.api
            .request(&Endpoint::ActivateJuvenile {
                event_id,
                juvenile_id: local.id.clone(),
            })
            .await?;
        info!(event_id = event_id, id = %local.id, "Juvenile activated");

        let refreshed = match self.fetch_remote_juvenile(event_id).await {
            Ok(Some(remote)) if remote.id == local.id => Juvenile::merge_remote(remote, &local),
            Ok(_) => local.clone(),
            Err(e) => {
                warn!(event_id = event_id, error = %e, "Refresh after activation failed");
                local.clone()
            }
        };

        // The backend confirmed the activation even if the refresh lags behind
        let juvenile = Juvenile {
            active: 1,
            is_enqueued: true,
            ..refreshed
        };
        self.store.save(&juvenile).await?;
        Ok(juvenile)
    }

    /// Purchase history of a juvenile
    pub async fn juvenile_history(&self, juvenile_id: &str) -> Result<Vec<Purchase>> {
        self.ensure_online()?;
        request_as(
            self.api.as_ref(),
            &Endpoint::JuvenileTransactions {
                juvenile_id: juvenile_id.to_string(),
            },
        )
        .await
    }

    /// Delete every stored reference entity of a type and reset its cache
    pub async fn clear_local<T: ReferenceEntity>(&self) -> Result<usize> {
        let removed = self.store.clear::<T>().await?;
        T::cache(&self.caches).write().await.clear();
        info!(model = T::model_name(), removed = removed, "Local records cleared");
        Ok(removed)
    }

    /// Delete every stored juvenile
    pub async fn clear_juveniles(&self) -> Result<usize> {
        let removed = self.store.clear::<Juvenile>().await?;
        info!(removed = removed, "Local juveniles cleared");
        Ok(removed)
    }

    /// Cached locations, sorted by name
    pub async fn locations(&self) -> Vec<Location> {
        let mut locations = self.caches.locations.read().await.clone();
        locations.sort_by(|a, b| a.name.cmp(&b.name));
        locations
    }

    /// Cached behaviors
    pub async fn behaviors(&self) -> Vec<Behavior> {
        self.caches.behaviors.read().await.clone()
    }

    // === Private Implementation ===

    fn ensure_online(&self) -> Result<()> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    async fn rebuild_cache<T: ReferenceEntity>(&self) -> Result<Vec<T>> {
        let items = self.store.query::<T>().await?;
        *T::cache(&self.caches).write().await = items.clone();
        Ok(items)
    }

    async fn fetch_remote_juvenile(&self, event_id: i64) -> Result<Option<Juvenile>> {
        match self
            .api
            .request(&Endpoint::JuvenileByEventId { event_id })
            .await
        {
            Ok(value) => decode_single_juvenile(value),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Carry local-only state onto a remote copy of an already stored juvenile
    async fn merge_with_stored(&self, remote: Juvenile) -> Result<Juvenile> {
        let id = remote.id.clone();
        Ok(match self.store.find::<Juvenile>(move |j| j.id == id).await? {
            Some(stored) => Juvenile::merge_remote(remote, &stored),
            None => remote,
        })
    }
}

fn not_found(event_id: i64) -> SyncError {
    SyncError::NotFound(format!("juvenile with event id {}", event_id))
}

/// The lookup endpoint answers with null, an object, or an array.
fn decode_single_juvenile(value: serde_json::Value) -> Result<Option<Juvenile>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Array(items) => {
            if items.len() > 1 {
                warn!(count = items.len(), "Several juveniles share an event id, using the first");
            }
            match items.into_iter().next() {
                Some(item) => Ok(Some(serde_json::from_value(item)?)),
                None => Ok(None),
            }
        }
        other => Ok(Some(serde_json::from_value(other)?)),
    }
}
