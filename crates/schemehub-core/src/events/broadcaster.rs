//! In-process change broadcaster.
//!
//! The `ChangeBroadcaster` is the bus a document store publishes to after
//! every successful write. It uses tokio's broadcast channel so that any
//! number of watchers can follow the same stream of changes.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::ChangeNotification;
use crate::collection::Collection;

/// Default buffer size for the broadcast channel.
/// Slow receivers that fall further behind observe a lag instead of blocking writers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for change notifications.
///
/// # Example
///
/// ```
/// use schemehub_core::{ChangeBroadcaster, Collection};
///
/// let broadcaster = ChangeBroadcaster::new();
/// let _receiver = broadcaster.subscribe();
/// broadcaster.send_inserted(Collection::States, "s1");
/// ```
#[derive(Clone)]
pub struct ChangeBroadcaster {
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send a notification to all subscribers.
    ///
    /// Returns the number of subscribers that received it (0 when nobody watches).
    pub fn send(&self, notification: ChangeNotification) -> usize {
        tracing::trace!(
            collection = %notification.collection,
            kind = %notification.kind,
            "broadcasting change notification"
        );
        self.sender.send(notification).unwrap_or_default()
    }

    pub fn send_inserted(&self, collection: Collection, document_id: impl Into<String>) -> usize {
        self.send(ChangeNotification::inserted(collection, document_id))
    }

    pub fn send_updated(&self, collection: Collection, document_id: impl Into<String>) -> usize {
        self.send(ChangeNotification::updated(collection, document_id))
    }

    pub fn send_deleted(&self, collection: Collection, document_id: impl Into<String>) -> usize {
        self.send(ChangeNotification::deleted(collection, document_id))
    }

    /// Subscribe to notifications sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
