//! Sources of change notifications.
//!
//! The listener only needs "a stream of notifications for collection X".
//! Two feeds provide it:
//!
//! - [`StoreChangeFeed`]: the source store's own `watch` stream
//! - [`RedisChangeFeed`]: Redis Pub/Sub, for writers that publish changes
//!   with [`publish_change`] instead of relying on a store-native stream
//!
//! ## Example Flow (Redis)
//!
//! ```text
//! Writer:     publish_change(pool, "schemehub", &notification)
//!   ↓
//! Redis Pub/Sub: PUBLISH schemehub:changes:schemes {json}
//!   ↓
//! Instance 1: RedisChangeFeed stream yields the notification → listener
//! Instance 2: RedisChangeFeed stream yields the notification → listener
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use schemehub_core::{ChangeNotification, Collection};
use schemehub_storage::{ChangeStream, DynSourceStore};

use crate::error::CacheError;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a notification stream for `collection`.
    ///
    /// The stream ends when the underlying connection is lost.
    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, CacheError>;

    /// Short feed name for logs.
    fn name(&self) -> &'static str;
}

pub type DynChangeFeed = Arc<dyn ChangeFeed>;

/// Feed backed by [`SourceStore::watch`](schemehub_storage::SourceStore::watch).
#[derive(Clone)]
pub struct StoreChangeFeed {
    store: DynSourceStore,
}

impl StoreChangeFeed {
    pub fn new(store: DynSourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeFeed for StoreChangeFeed {
    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, CacheError> {
        Ok(self.store.watch(collection).await?)
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

/// Redis Pub/Sub channel carrying changes of one collection.
pub fn change_channel(namespace: &str, collection: Collection) -> String {
    format!("{namespace}:changes:{collection}")
}

/// Feed backed by Redis Pub/Sub.
///
/// Each subscription opens a dedicated connection, since a Pub/Sub
/// connection cannot be returned to the pool.
#[derive(Debug, Clone)]
pub struct RedisChangeFeed {
    redis_url: String,
    namespace: String,
}

impl RedisChangeFeed {
    pub fn new(redis_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, CacheError> {
        let client = redis::Client::open(self.redis_url.clone()).map_err(|e| {
            CacheError::cache_unavailable(format!("failed to create Redis client: {e}"))
        })?;

        let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
            CacheError::cache_unavailable(format!("failed to get pub/sub connection: {e}"))
        })?;

        let channel = change_channel(&self.namespace, collection);
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| CacheError::cache_unavailable(format!("failed to subscribe: {e}")))?;

        tracing::info!(channel = %channel, "Subscribed to change channel");

        let stream = pubsub.into_on_message().map(move |msg| {
            match msg
                .get_payload::<String>()
                .ok()
                .and_then(|payload| serde_json::from_str::<ChangeNotification>(&payload).ok())
            {
                Some(notification) if notification.collection == collection => notification,
                _ => {
                    // Still a signal that something changed.
                    tracing::warn!(
                        collection = %collection,
                        "unreadable change message, forcing resync"
                    );
                    ChangeNotification::resync(collection)
                }
            }
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Publish a change notification to every instance.
pub async fn publish_change(
    redis: &Pool,
    namespace: &str,
    notification: &ChangeNotification,
) -> Result<(), CacheError> {
    let mut conn = redis
        .get()
        .await
        .map_err(|e| CacheError::cache_unavailable(format!("failed to get Redis connection: {e}")))?;

    let channel = change_channel(namespace, notification.collection);
    let payload = serde_json::to_string(notification)?;
    conn.publish::<_, _, ()>(&channel, payload)
        .await
        .map_err(|e| CacheError::cache_unavailable(format!("failed to publish change: {e}")))?;

    tracing::debug!(channel = %channel, kind = %notification.kind, "published change notification");
    Ok(())
}
