//! Active-set tracker (the scan queue)
//!
//! An ordered, duplicate-free list of juveniles waiting for a behavior
//! submission. It mirrors the stored juveniles that are enqueued and active:
//! rebuilt from the store on start, then corrected by the change feed.
//!
//! ## Ordering
//!
//! One worker task drains the juvenile feed in delivery order and is the only
//! place the list changes. Removal writes to the store and then waits for the
//! worker to apply the echo of that write, so a scan committed in between is
//! never undone. Every change is published through a `watch` channel, so
//! observers never see a half-applied update.

use crate::error::Result;
use crate::events::{EventBus, Notification};
use crate::models::Juvenile;
use crate::store::{DataStore, FeedItem, Mutation, MutationType, Subscription};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Effect of one mutation on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChange {
    None,
    /// Appended at the end
    Added,
    /// Updated in place
    Replaced,
    /// Deleted from the store
    Removed,
    /// No longer enqueued or active; dropped without a notification
    Dropped,
}

impl QueueChange {
    pub fn notification(&self, juvenile: &Juvenile) -> Option<Notification> {
        match self {
            QueueChange::Added => Some(Notification::Added {
                name: juvenile.first_name.clone(),
            }),
            QueueChange::Removed => Some(Notification::Removed {
                name: juvenile.first_name.clone(),
            }),
            _ => None,
        }
    }
}

/// Apply one feed mutation to an ordered member list.
pub fn apply_mutation(members: &mut Vec<Juvenile>, mutation: &Mutation<Juvenile>) -> QueueChange {
    let entity = &mutation.entity;
    let position = members.iter().position(|m| m.id == entity.id);

    match (mutation.mutation_type, position) {
        (MutationType::Delete, Some(pos)) => {
            members.remove(pos);
            QueueChange::Removed
        }
        (MutationType::Delete, None) => QueueChange::None,
        (_, None) if entity.belongs_in_queue() => {
            members.push(entity.clone());
            QueueChange::Added
        }
        (_, Some(pos)) if entity.belongs_in_queue() => {
            if members[pos] == *entity {
                QueueChange::None
            } else {
                members[pos] = entity.clone();
                QueueChange::Replaced
            }
        }
        (MutationType::Update, Some(pos)) => {
            members.remove(pos);
            QueueChange::Dropped
        }
        _ => QueueChange::None,
    }
}

/// Outcome of [`QueueTracker::remove_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveAllReport {
    pub removed: usize,
    pub failed: usize,
}

/// Tracks the scan queue
pub struct QueueTracker {
    store: DataStore,
    events: EventBus,
    members: Arc<watch::Sender<Vec<Juvenile>>>,
    /// Feed events handled by the worker so far
    processed: Arc<watch::Sender<u64>>,
    /// Highest juvenile commit sequence reflected in `members`
    applied: Arc<watch::Sender<u64>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueTracker {
    pub fn new(store: DataStore, events: EventBus) -> Self {
        let (members, _) = watch::channel(Vec::new());
        let (processed, _) = watch::channel(0);
        let (applied, _) = watch::channel(0);
        Self {
            store,
            events,
            members: Arc::new(members),
            processed: Arc::new(processed),
            applied: Arc::new(applied),
            worker: Mutex::new(None),
        }
    }

    /// Rebuild the queue from the store and start following the feed.
    ///
    /// Calling it again restarts from a fresh snapshot.
    pub async fn initialize(&self) -> Result<()> {
        let (snapshot, feed) = self.store.snapshot_and_subscribe::<Juvenile>().await?;
        let members: Vec<Juvenile> = snapshot
            .into_iter()
            .filter(Juvenile::belongs_in_queue)
            .collect();
        info!(count = members.len(), "Queue restored");
        self.members.send_replace(members);

        let handle = tokio::spawn(run_worker(
            feed,
            self.store.clone(),
            self.events.clone(),
            self.members.clone(),
            self.processed.clone(),
            self.applied.clone(),
        ));
        if let Some(previous) = self.lock_worker().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Take a juvenile out of the queue.
    ///
    /// The cleared flag is persisted first and the list follows once the
    /// worker has applied that write. On failure nothing changes. A juvenile
    /// the store does not know is left alone.
    pub async fn remove(&self, juvenile: &Juvenile) -> Result<()> {
        self.remove_inner(juvenile, true).await
    }

    /// Remove every member, continuing past failures
    pub async fn remove_all(&self) -> RemoveAllReport {
        let members = self.members();
        let mut report = RemoveAllReport::default();

        for juvenile in &members {
            match self.remove_inner(juvenile, false).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(id = %juvenile.id, error = %e, "Failed to remove from queue");
                    report.failed += 1;
                }
            }
        }

        info!(removed = report.removed, failed = report.failed, "Queue cleared");
        if report.failed == 0 {
            self.events.publish(Notification::QueueEmptied);
        } else {
            self.events.publish(Notification::RemovalFailed {
                failed: report.failed,
            });
        }
        report
    }

    /// Current members in queue order
    pub fn members(&self) -> Vec<Juvenile> {
        self.members.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.borrow().iter().any(|m| m.id == id)
    }

    /// Observe the ordered member list
    pub fn subscribe(&self) -> watch::Receiver<Vec<Juvenile>> {
        self.members.subscribe()
    }

    /// Wait until the worker has handled at least `count` feed events
    pub async fn wait_processed(&self, count: u64) {
        let mut rx = self.processed.subscribe();
        let _ = rx.wait_for(|processed| *processed >= count).await;
    }

    /// Stop following the feed
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_worker().take() {
            handle.abort();
            debug!("Queue worker stopped");
        }
    }

    // === Private Implementation ===

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until the worker has applied juvenile writes up to `seq`
    async fn wait_applied(&self, seq: u64) {
        let running = self
            .lock_worker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !running {
            return;
        }
        let mut rx = self.applied.subscribe();
        let _ = rx.wait_for(|applied| *applied >= seq).await;
    }

    async fn remove_inner(&self, juvenile: &Juvenile, notify: bool) -> Result<()> {
        let was_member = self.contains(&juvenile.id);

        // Prefer the stored copy so fresher fields are not overwritten
        let id = juvenile.id.clone();
        let Some(mut updated) = self.store.find::<Juvenile>(move |j| j.id == id).await? else {
            debug!(id = %juvenile.id, "Juvenile not stored, nothing to remove");
            return Ok(());
        };
        updated.is_enqueued = false;
        self.store.save(&updated).await?;

        let committed = self.store.current_seq::<Juvenile>().await?;
        self.wait_applied(committed).await;

        if was_member && notify {
            self.events.publish(Notification::Removed {
                name: juvenile.first_name.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for QueueTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(
    mut feed: Subscription<Juvenile>,
    store: DataStore,
    events: EventBus,
    members: Arc<watch::Sender<Vec<Juvenile>>>,
    processed: Arc<watch::Sender<u64>>,
    applied: Arc<watch::Sender<u64>>,
) {
    while let Some(item) = feed.recv().await {
        match item {
            FeedItem::Mutation(mutation) => {
                let mut change = QueueChange::None;
                members.send_if_modified(|list| {
                    change = apply_mutation(list, &mutation);
                    change != QueueChange::None
                });

                if change != QueueChange::None {
                    debug!(
                        id = %mutation.entity.id,
                        mutation = mutation.mutation_type.as_str(),
                        change = ?change,
                        "Queue updated"
                    );
                }
                if let Some(notification) = change.notification(&mutation.entity) {
                    events.publish(notification);
                }
                applied.send_if_modified(|seq| raise(seq, mutation.seq));
                processed.send_modify(|n| *n += 1);
            }
            FeedItem::Lagged(missed) => {
                warn!(missed = missed, "Queue feed lagged, resyncing from store");
                match resync(&store, &members).await {
                    Ok(seq) => {
                        applied.send_if_modified(|applied| raise(applied, seq));
                    }
                    Err(e) => warn!(error = %e, "Queue resync failed"),
                }
                processed.send_modify(|n| *n += missed);
            }
        }
    }
    debug!("Juvenile feed closed");
}

fn raise(current: &mut u64, seq: u64) -> bool {
    if seq > *current {
        *current = seq;
        true
    } else {
        false
    }
}

/// Rebuild membership from the store, keeping the order of surviving members.
///
/// Returns a commit sequence the rebuilt list is known to include.
async fn resync(store: &DataStore, members: &watch::Sender<Vec<Juvenile>>) -> Result<u64> {
    let seq = store.current_seq::<Juvenile>().await?;
    let stored: Vec<Juvenile> = store
        .query::<Juvenile>()
        .await?
        .into_iter()
        .filter(Juvenile::belongs_in_queue)
        .collect();

    members.send_modify(|list| {
        let mut rebuilt: Vec<Juvenile> = list
            .iter()
            .filter_map(|m| stored.iter().find(|s| s.id == m.id).cloned())
            .collect();
        for juvenile in &stored {
            if !rebuilt.iter().any(|m| m.id == juvenile.id) {
                rebuilt.push(juvenile.clone());
            }
        }
        *list = rebuilt;
    });
    Ok(seq)
}
