//! The listing cache service: tiers, orchestrator and listeners with an
//! explicit `init()` / `shutdown()` lifecycle.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::config::CacheSettings;
use crate::distributed::DynDistributedCache;
use crate::error::CacheResult;
use crate::feed::{DynChangeFeed, StoreChangeFeed};
use crate::key::{ListingQuery, Resource};
use crate::listener::ChangeListener;
use crate::orchestrator::RefreshOrchestrator;
use crate::process::ProcessCache;
use crate::read_path::{Lookup, ReadPath};
use crate::stats::{CacheStatistics, CacheStatsSnapshot};
use schemehub_storage::DynSourceStore;

/// Multi-tier cache in front of the listing queries.
///
/// # Example
///
/// ```ignore
/// let distributed = create_distributed_cache(&settings.redis).await;
/// let cache = ListingCache::new(settings, store, distributed);
/// cache.init().await;
///
/// let lookup = cache.read("schemes", [("stateSlug", "kerala")]).await?;
/// println!("{} rows from {}", lookup.view.len(), lookup.tier);
///
/// cache.shutdown();
/// ```
pub struct ListingCache {
    settings: CacheSettings,
    orchestrator: Arc<RefreshOrchestrator>,
    read_path: ReadPath,
    feed: DynChangeFeed,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ListingCache {
    /// Creates the service. Changes are taken from the store's own watch
    /// stream unless another feed is set with [`with_change_feed`](Self::with_change_feed).
    pub fn new(
        settings: CacheSettings,
        store: DynSourceStore,
        distributed: DynDistributedCache,
    ) -> Self {
        let feed: DynChangeFeed = Arc::new(StoreChangeFeed::new(store.clone()));
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            store,
            distributed,
            Arc::new(ProcessCache::new()),
            &settings,
            Arc::new(CacheStatistics::default()),
        ));
        Self {
            read_path: ReadPath::new(Arc::clone(&orchestrator)),
            settings,
            orchestrator,
            feed,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_change_feed(mut self, feed: DynChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Starts one change listener per watched collection, then warms every
    /// whole aggregate (if configured).
    ///
    /// Listeners are subscribed before warming starts and before this
    /// returns, so a write made at any point after `init` is called reaches
    /// the orchestrator. Warm-up failures are logged and do not abort; the
    /// read path fills empty tiers on demand. Calling `init` twice restarts
    /// the listeners.
    pub async fn init(&self) -> usize {
        let handles: Vec<JoinHandle<()>> =
            join_all(Resource::watched_collections().into_iter().map(|collection| {
                ChangeListener::new(
                    Arc::clone(&self.feed),
                    Arc::clone(&self.orchestrator),
                    collection,
                )
                .with_debounce(self.settings.cache.debounce())
                .start()
            }))
            .await;
        let listeners = handles.len();
        {
            let mut running = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            for old in running.drain(..) {
                old.abort();
            }
            *running = handles;
        }

        let warmed = if self.settings.cache.warm_on_start {
            self.orchestrator.warm_all().await
        } else {
            0
        };
        tracing::info!(
            warmed,
            listeners,
            feed = self.feed.name(),
            "listing cache started"
        );
        warmed
    }

    /// Stops the listeners and empties the process tier.
    pub fn shutdown(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in listeners.drain(..) {
            handle.abort();
        }
        self.orchestrator.process().clear_all();
        tracing::info!("listing cache stopped");
    }

    pub fn is_running(&self) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| !h.is_finished())
    }

    /// Normalizes raw request parameters for `resource_name`.
    pub fn query<I, K, V>(&self, resource_name: &str, raw: I) -> CacheResult<ListingQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        ListingQuery::parse(resource_name, raw, &self.settings.paging)
    }

    /// Parses raw parameters and reads the listing.
    pub async fn read<I, K, V>(&self, resource_name: &str, raw: I) -> CacheResult<Lookup>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = self.query(resource_name, raw)?;
        self.read_path.get(&query).await
    }

    pub async fn read_query(&self, query: &ListingQuery) -> CacheResult<Lookup> {
        self.read_path.get(query).await
    }

    pub fn orchestrator(&self) -> &Arc<RefreshOrchestrator> {
        &self.orchestrator
    }

    pub fn process_cache(&self) -> &Arc<ProcessCache> {
        self.orchestrator.process()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.orchestrator.stats().snapshot()
    }
}

impl Drop for ListingCache {
    fn drop(&mut self) {
        let listeners = self.listeners.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ListingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingCache")
            .field("namespace", &self.settings.cache.namespace)
            .field("feed", &self.feed.name())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::MemoryDistributedCache;
    use crate::read_path::Tier;
    use schemehub_core::Collection;
    use schemehub_storage::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn init_warms_and_shutdown_clears() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(Collection::States, json!({"_id": "s1", "name": "Alpha"}))
            .await
            .unwrap();
        let cache = ListingCache::new(
            CacheSettings::default(),
            store.clone(),
            Arc::new(MemoryDistributedCache::new()),
        );

        assert_eq!(cache.init().await, 3);
        assert!(cache.is_running());
        assert_eq!(cache.process_cache().len(), 3);

        let lookup = cache.read("states", Vec::<(&str, &str)>::new()).await.unwrap();
        assert_eq!(lookup.tier, Tier::Process);

        cache.shutdown();
        assert!(cache.process_cache().is_empty());
    }

    #[tokio::test]
    async fn write_right_after_init_becomes_visible() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(Collection::States, json!({"_id": "s1", "name": "Alpha"}))
            .await
            .unwrap();
        let cache = ListingCache::new(
            CacheSettings::default(),
            store.clone(),
            Arc::new(MemoryDistributedCache::new()),
        );
        cache.init().await;
        store
            .insert(Collection::States, json!({"_id": "s2", "name": "Beta"}))
            .await
            .unwrap();

        let mut rows = 0;
        for _ in 0..100 {
            rows = cache.read("states", Vec::<(&str, &str)>::new()).await.unwrap().view.len();
            if rows == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rows, 2);
        cache.shutdown();
    }

    #[tokio::test]
    async fn warm_up_failure_does_not_abort_init() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true);
        let cache = ListingCache::new(
            CacheSettings::default(),
            store.clone(),
            Arc::new(MemoryDistributedCache::new()),
        );
        assert_eq!(cache.init().await, 0);

        store.set_offline(false);
        let lookup = cache.read("statesSummary", [("limit", "3")]).await.unwrap();
        assert_eq!(lookup.tier, Tier::Source);
        cache.shutdown();
    }

    #[tokio::test]
    async fn unknown_resource_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ListingCache::new(
            CacheSettings::default(),
            store,
            Arc::new(MemoryDistributedCache::new()),
        );
        let err = cache.read("users", [("limit", "1")]).await.unwrap_err();
        assert!(matches!(err, crate::error::CacheError::UnknownResource(_)));
    }
}
