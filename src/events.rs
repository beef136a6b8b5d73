//! User-facing notifications
//!
//! Components publish [`Notification`]s on a shared [`EventBus`]; the UI
//! subscribes and renders them as transient messages or prompts.

use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Default notification channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A juvenile joined the queue
    Added { name: String },
    /// A juvenile left the queue
    Removed { name: String },
    /// `remove_all` finished without failures
    QueueEmptied,
    /// A scanned juvenile is inactive and needs confirmation
    ReactivationPrompt { event_id: i64, name: String },
    /// A scanned code matched nobody
    NotFound { event_id: i64 },
    /// Behavior posts were stored for upload
    Submitted { count: usize },
    /// A submission could not be stored
    SubmissionFailed { name: String, reason: String },
    /// Some queue removals failed
    RemovalFailed { failed: usize },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Added { name } => write!(f, "{} was added!", name),
            Notification::Removed { name } => write!(f, "{} was removed.", name),
            Notification::QueueEmptied => f.write_str("Queue is emptied."),
            Notification::ReactivationPrompt { name, .. } => {
                write!(f, "Do you want to reactivate {}?", name)
            }
            Notification::NotFound { event_id } => {
                write!(f, "No juvenile found for code {}.", event_id)
            }
            Notification::Submitted { count } => match count {
                1 => f.write_str("1 behavior submitted."),
                n => write!(f, "{} behaviors submitted.", n),
            },
            Notification::SubmissionFailed { name, reason } => {
                write!(f, "Could not submit for {}: {}", name, reason)
            }
            Notification::RemovalFailed { failed } => {
                write!(f, "{} could not be removed from the queue.", failed)
            }
        }
    }
}

/// Broadcast bus for notifications. Clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        debug!(message = %notification, "Notification");
        // Dropped when nobody listens
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
