//! Outbox of behavior submissions
//!
//! Every submission is stored as a [`Post`] before anything else happens, and
//! a post is deleted only after the backend acknowledged its increment. The
//! stored posts are therefore the one record of what is still owed.
//!
//! Flushing sends all stored posts with bounded parallelism and waits for the
//! whole batch. Failed posts stay stored for the next trigger (reconnect,
//! manual retry, foreground). There is no backoff beyond that.

use crate::api::{Endpoint, RemoteApi};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::models::Post;
use crate::store::{DataStore, FeedItem, MutationType};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Configuration for the outbox
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Uploads in flight at once during a flush
    pub max_concurrent_uploads: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 2,
        }
    }
}

impl OutboxConfig {
    /// One upload at a time
    pub fn serial() -> Self {
        Self {
            max_concurrent_uploads: 1,
        }
    }
}

/// Result of a flush operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Posts acknowledged and deleted
    pub succeeded: usize,
    /// Posts left for the next flush
    pub failed: usize,
    /// Posts stored after the flush finished
    pub remaining: usize,
    /// Error messages for failed posts
    pub errors: Vec<String>,
}

/// Durable queue of pending posts
pub struct Outbox {
    store: DataStore,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    config: OutboxConfig,
    /// One flush at a time per outbox
    flush_lock: tokio::sync::Mutex<()>,
    pending: Arc<watch::Sender<usize>>,
    counter: Mutex<Option<JoinHandle<()>>>,
}

impl Outbox {
    pub fn new(
        store: DataStore,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        config: OutboxConfig,
    ) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            store,
            api,
            connectivity,
            config,
            flush_lock: tokio::sync::Mutex::new(()),
            pending: Arc::new(pending),
            counter: Mutex::new(None),
        }
    }

    /// Seed the pending count from the store and keep it current from the feed
    pub async fn start(&self) -> Result<()> {
        let (snapshot, mut feed) = self.store.snapshot_and_subscribe::<Post>().await?;
        self.pending.send_replace(snapshot.len());
        info!(pending = snapshot.len(), "Outbox started");

        let pending = self.pending.clone();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = feed.recv().await {
                match item {
                    FeedItem::Mutation(mutation) => match mutation.mutation_type {
                        MutationType::Create => pending.send_modify(|n| *n += 1),
                        MutationType::Delete => pending.send_modify(|n| *n = n.saturating_sub(1)),
                        MutationType::Update => {}
                    },
                    FeedItem::Lagged(missed) => {
                        // Events still buffered are already in a fresh count,
                        // so the count and the feed restart together
                        warn!(missed = missed, "Post feed lagged, recounting");
                        match store.snapshot_and_subscribe::<Post>().await {
                            Ok((posts, fresh)) => {
                                pending.send_replace(posts.len());
                                feed = fresh;
                            }
                            Err(e) => warn!(error = %e, "Failed to recount posts"),
                        }
                    }
                }
            }
            debug!("Post feed closed");
        });

        if let Some(previous) = self.lock_counter().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Store a new post for upload
    pub async fn enqueue(
        &self,
        juvenile_id: impl Into<String>,
        behavior_id: impl Into<String>,
    ) -> Result<Post> {
        let post = Post::new(juvenile_id, behavior_id);
        self.store.save(&post).await?;
        debug!(
            post_id = %post.id,
            juvenile_id = %post.juvenile_id,
            behavior_id = %post.behavior_id,
            "Post queued"
        );
        Ok(post)
    }

    /// Send every stored post once.
    ///
    /// Refuses while offline. A concurrent caller waits for the running flush
    /// and then reads the store again, so a post is never sent twice by
    /// overlapping flushes.
    pub async fn flush(&self) -> Result<FlushResult> {
        if !self.connectivity.is_online() {
            return Err(SyncError::NotConnected);
        }

        let _guard = self.flush_lock.lock().await;
        if !self.connectivity.is_online() {
            return Err(SyncError::NotConnected);
        }

        let posts = self.store.query::<Post>().await?;
        if posts.is_empty() {
            return Ok(FlushResult::default());
        }
        info!(count = posts.len(), "Flushing posts");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_uploads.max(1)));
        let mut uploads = JoinSet::new();
        for post in posts {
            let semaphore = Arc::clone(&semaphore);
            let api = Arc::clone(&self.api);
            let store = self.store.clone();
            uploads.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => upload(api.as_ref(), &store, &post).await,
                    Err(_) => Err(SyncError::server("upload limiter closed")),
                };
                (post, outcome)
            });
        }

        let mut result = FlushResult::default();
        while let Some(joined) = uploads.join_next().await {
            match joined {
                Ok((_, Ok(()))) => result.succeeded += 1,
                Ok((post, Err(e))) => {
                    warn!(post_id = %post.id, retryable = e.is_retryable(), error = %e, "Post upload failed");
                    result.failed += 1;
                    result.errors.push(format!("{}: {}", post.id, e));
                }
                Err(e) => {
                    warn!(error = %e, "Upload task failed");
                    result.failed += 1;
                    result.errors.push(e.to_string());
                }
            }
        }

        result.remaining = self.store.count::<Post>().await?;
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            remaining = result.remaining,
            "Flush finished"
        );
        Ok(result)
    }

    /// Stored posts
    pub async fn pending_posts(&self) -> Result<Vec<Post>> {
        self.store.query::<Post>().await
    }

    /// Live count of stored posts (after [`start`](Self::start))
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Stop the pending counter
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_counter().take() {
            handle.abort();
        }
    }

    fn lock_counter(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.counter.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Send one post and delete it once acknowledged
async fn upload(api: &dyn RemoteApi, store: &DataStore, post: &Post) -> Result<()> {
    let endpoint = Endpoint::increment_points(&post.juvenile_id, &post.behavior_id)?;
    api.request(&endpoint).await?;

    // Acknowledged; a failed delete means the post is sent again next time
    store.delete(post).await.map_err(|e| {
        warn!(post_id = %post.id, error = %e, "Acknowledged post could not be deleted");
        e
    })?;
    debug!(post_id = %post.id, "Post acknowledged");
    Ok(())
}
