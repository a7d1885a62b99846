//! Background task feeding change notifications to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use schemehub_core::{ChangeNotification, Collection};
use schemehub_storage::ChangeStream;
use tokio::task::JoinHandle;

use crate::error::CacheError;
use crate::feed::DynChangeFeed;
use crate::orchestrator::RefreshOrchestrator;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

/// Change listener for one watched collection.
///
/// ## How It Works
///
/// 1. Subscribe to the collection's change feed before returning
/// 2. For each notification (or each burst, when debouncing), call
///    [`RefreshOrchestrator::handle_change`]
/// 3. When the stream ends or fails, reconnect with exponential backoff and
///    resync, since notifications may have been missed in between
pub struct ChangeListener {
    feed: DynChangeFeed,
    orchestrator: Arc<RefreshOrchestrator>,
    collection: Collection,
    debounce: Duration,
}

impl ChangeListener {
    pub fn new(
        feed: DynChangeFeed,
        orchestrator: Arc<RefreshOrchestrator>,
        collection: Collection,
    ) -> Self {
        Self {
            feed,
            orchestrator,
            collection,
            debounce: Duration::ZERO,
        }
    }

    /// Coalesce notifications arriving within `debounce` of each other.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Subscribes to the feed, then keeps listening in a background task.
    ///
    /// Changes made after this returns are delivered to the orchestrator,
    /// so warming the tiers afterwards cannot miss one. If the first
    /// subscription fails the task retries with backoff and resyncs once
    /// subscribed. Abort the returned handle to stop the listener.
    pub async fn start(self) -> JoinHandle<()> {
        let first = self.feed.subscribe(self.collection).await;
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut attempt = Some(first);
            let mut resync = false;

            loop {
                let subscribed = match attempt.take() {
                    Some(result) => result,
                    None => self.feed.subscribe(self.collection).await,
                };
                let err = match subscribed {
                    Ok(stream) => {
                        backoff = INITIAL_BACKOFF;
                        self.listen(stream, resync).await
                    }
                    Err(e) => e,
                };
                resync = true;
                tracing::error!(
                    collection = %self.collection,
                    feed = self.feed.name(),
                    error = %err,
                    backoff_secs = backoff.as_secs(),
                    "Change listener error, reconnecting..."
                );
                tokio::time::sleep(backoff).await;
                // Exponential backoff with max limit
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
    }

    /// Consumes one subscription until it fails.
    async fn listen(&self, mut stream: ChangeStream, resync: bool) -> CacheError {
        tracing::info!(
            collection = %self.collection,
            feed = self.feed.name(),
            "Listening for changes"
        );

        if resync {
            self.orchestrator
                .handle_change(&ChangeNotification::resync(self.collection))
                .await;
        }

        loop {
            let Some(notification) = stream.next().await else {
                return CacheError::cache_unavailable("change stream closed");
            };
            let stream_open = self.absorb_burst(&mut stream).await;
            let outcome = self.orchestrator.handle_change(&notification).await;
            tracing::debug!(
                collection = %self.collection,
                refreshed = outcome.refreshed.len(),
                failed = outcome.failed.len(),
                pages_dropped = outcome.pages_dropped,
                "change handled"
            );
            if !stream_open {
                return CacheError::cache_unavailable("change stream closed");
            }
        }
    }

    /// Drains notifications that arrive within the debounce window.
    ///
    /// Returns `false` if the stream ended while draining.
    async fn absorb_burst(&self, stream: &mut ChangeStream) -> bool {
        if self.debounce.is_zero() {
            return true;
        }
        let mut coalesced = 0u64;
        loop {
            match tokio::time::timeout(self.debounce, stream.next()).await {
                Ok(Some(_)) => coalesced += 1,
                Ok(None) => return false,
                Err(_) => break,
            }
        }
        if coalesced > 0 {
            tracing::debug!(collection = %self.collection, coalesced, "debounced change burst");
        }
        true
    }
}

impl std::fmt::Debug for ChangeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListener")
            .field("collection", &self.collection)
            .field("feed", &self.feed.name())
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::distributed::MemoryDistributedCache;
    use crate::feed::{ChangeFeed, StoreChangeFeed};
    use crate::key::Resource;
    use crate::process::ProcessCache;
    use crate::stats::CacheStatistics;
    use async_trait::async_trait;
    use schemehub_core::StateListItem;
    use schemehub_storage::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator(store: Arc<InMemoryStore>) -> Arc<RefreshOrchestrator> {
        Arc::new(RefreshOrchestrator::new(
            store,
            Arc::new(MemoryDistributedCache::new()),
            Arc::new(ProcessCache::new()),
            &CacheSettings::default(),
            Arc::new(CacheStatistics::default()),
        ))
    }

    async fn wait_for_state_count(orch: &RefreshOrchestrator, expected: usize) {
        for _ in 0..100 {
            if let Some(view) = orch.process().get(Resource::States) {
                if view.len() == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("states view never reached {expected} rows");
    }

    #[tokio::test]
    async fn change_triggers_refresh() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());
        orch.refresh(Resource::States).await.unwrap();

        let handle = ChangeListener::new(
            Arc::new(StoreChangeFeed::new(store.clone())),
            orch.clone(),
            Collection::States,
        )
        .start()
        .await;

        store
            .insert(Collection::States, json!({"_id": "s1", "name": "Alpha"}))
            .await
            .unwrap();
        wait_for_state_count(&orch, 1).await;

        let rows: Vec<StateListItem> = orch
            .process()
            .get(Resource::States)
            .unwrap()
            .rows_as()
            .unwrap();
        assert_eq!(rows[0].name, "Alpha");
        handle.abort();
    }

    #[tokio::test]
    async fn debounce_coalesces_bursts() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());

        let handle = ChangeListener::new(
            Arc::new(StoreChangeFeed::new(store.clone())),
            orch.clone(),
            Collection::States,
        )
        .with_debounce(Duration::from_millis(100))
        .start()
        .await;

        for i in 0..10 {
            store
                .insert(Collection::States, json!({"name": format!("S{i}")}))
                .await
                .unwrap();
        }
        wait_for_state_count(&orch, 10).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        // One burst refreshes `states` and `statesSummary` once each.
        assert_eq!(orch.stats().snapshot().refreshes, 2);
        handle.abort();
    }

    /// Feed that fails a fixed number of times before delegating.
    struct FlakyFeed {
        inner: StoreChangeFeed,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ChangeFeed for FlakyFeed {
        async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, CacheError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CacheError::cache_unavailable("feed down"));
            }
            self.inner.subscribe(collection).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn reconnect_resyncs() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(Collection::States, json!({"_id": "s1", "name": "Alpha"}))
            .await
            .unwrap();
        let orch = orchestrator(store.clone());

        let feed = FlakyFeed {
            inner: StoreChangeFeed::new(store.clone()),
            failures_left: AtomicUsize::new(1),
        };
        let handle = ChangeListener::new(Arc::new(feed), orch.clone(), Collection::States)
            .start()
            .await;

        // First attempt fails, the retry after 1s resubscribes and resyncs.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(orch.process().get(Resource::States).unwrap().len(), 1);
        handle.abort();
    }
}
