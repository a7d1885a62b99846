//! Recomputes listings from the source store and publishes them.
//!
//! A refresh is always a full replace. Whole aggregates go to the
//! distributed tier (aggregate TTL) and the process tier; pages go to the
//! distributed tier only (page TTL) and their keys are remembered so a
//! change notification can drop them.
//!
//! A failed recompute publishes nothing: whatever the tiers held before
//! stays in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use schemehub_core::{
    AggregateView, CategoryListItem, CategorySummary, ChangeNotification, Collection, NamedRef,
    SchemeCard, StateListItem, StateSummary,
};
use schemehub_storage::{DynSourceStore, Filter, FindOptions, Pipeline, ProjectField, Sort};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::codec::PayloadCodec;
use crate::config::{CacheOptions, CacheSettings, PagingSettings};
use crate::distributed::DynDistributedCache;
use crate::error::CacheResult;
use crate::key::{CacheKey, ListingQuery, Page, Resource};
use crate::process::ProcessCache;
use crate::stats::CacheStatistics;

const SCHEME_CARD_FIELDS: [&str; 10] = [
    "schemeTitle",
    "slug",
    "excerpt",
    "about",
    "cardImage",
    "isFeatured",
    "publishedOn",
    "createdAt",
    "state",
    "category",
];

/// What a change notification caused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeOutcome {
    /// Whole aggregates recomputed and published
    pub refreshed: Vec<Resource>,
    /// Whole aggregates whose recompute failed (previous value kept)
    pub failed: Vec<Resource>,
    /// Page keys removed from the distributed tier
    pub pages_dropped: usize,
}

/// Newest whole-aggregate result handed to the process tier.
struct Published {
    ticket: u64,
    view: Arc<AggregateView>,
}

pub struct RefreshOrchestrator {
    store: DynSourceStore,
    distributed: DynDistributedCache,
    process: Arc<ProcessCache>,
    codec: PayloadCodec,
    options: CacheOptions,
    paging: PagingSettings,
    stats: Arc<CacheStatistics>,
    /// Page keys this instance wrote, with their resource
    page_keys: DashMap<String, Resource>,
    /// Bumped on every page invalidation
    page_generation: AtomicU64,
    /// Issued at the start of each whole-aggregate refresh
    tickets: AtomicU64,
    /// Newest result published per whole aggregate
    published: DashMap<Resource, Published>,
}

impl RefreshOrchestrator {
    pub fn new(
        store: DynSourceStore,
        distributed: DynDistributedCache,
        process: Arc<ProcessCache>,
        settings: &CacheSettings,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        Self {
            store,
            distributed,
            process,
            codec: PayloadCodec::new(settings.cache.compression_threshold_bytes),
            options: settings.cache.clone(),
            paging: settings.paging.clone(),
            stats,
            page_keys: DashMap::new(),
            page_generation: AtomicU64::new(0),
            tickets: AtomicU64::new(0),
            published: DashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    pub fn process(&self) -> &Arc<ProcessCache> {
        &self.process
    }

    pub fn distributed(&self) -> &DynDistributedCache {
        &self.distributed
    }

    pub fn stats(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    pub fn paging(&self) -> &PagingSettings {
        &self.paging
    }

    /// Number of page keys currently tracked for invalidation.
    pub fn tracked_pages(&self) -> usize {
        self.page_keys.len()
    }

    /// Recomputes a whole aggregate and publishes it to both cache tiers.
    pub async fn refresh(&self, resource: Resource) -> CacheResult<Arc<AggregateView>> {
        self.refresh_query(&ListingQuery::defaults(resource, &self.paging))
            .await
    }

    /// Recomputes the view for `query` and publishes it.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::SourceUnavailable` when the source store fails;
    /// nothing is published in that case.
    pub async fn refresh_query(&self, query: &ListingQuery) -> CacheResult<Arc<AggregateView>> {
        let resource = query.resource();
        let key = query.cache_key(self.namespace());
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.page_generation.load(Ordering::SeqCst);
        let started = Instant::now();

        let view = match self.compute(query).await {
            Ok(view) => Arc::new(view),
            Err(e) => {
                CacheStatistics::incr(&self.stats.refresh_failures);
                error!(
                    resource = %resource,
                    key = %key,
                    error = %e,
                    "refresh failed, keeping previous cache entries"
                );
                return Err(e);
            }
        };
        CacheStatistics::incr(&self.stats.refreshes);
        debug!(
            resource = %resource,
            key = %key,
            rows = view.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "view recomputed"
        );

        if resource.is_whole() {
            self.publish_whole(resource, &key, &view, ticket).await;
        } else {
            self.publish_page(resource, key, &view, generation).await;
        }
        Ok(view)
    }

    async fn publish_whole(
        &self,
        resource: Resource,
        key: &CacheKey,
        view: &Arc<AggregateView>,
        ticket: u64,
    ) {
        {
            let mut slot = self.published.entry(resource).or_insert_with(|| Published {
                ticket: 0,
                view: Arc::clone(view),
            });
            if slot.ticket > ticket {
                debug!(resource = %resource, "newer refresh already published, dropping result");
                return;
            }
            slot.ticket = ticket;
            slot.view = Arc::clone(view);
            self.process.set(resource, Arc::clone(view));
        }

        let ttl = self.options.aggregate_ttl();
        let (mut ticket, mut view) = (ticket, Arc::clone(view));
        while self.write_distributed(key, &view, ttl).await {
            // A newer refresh may have published while this write was in
            // flight; the distributed tier must end up with its view.
            let newer = match self.published.get(&resource) {
                Some(slot) if slot.ticket != ticket => (slot.ticket, Arc::clone(&slot.view)),
                _ => return,
            };
            debug!(resource = %resource, "rewriting distributed entry with newer view");
            (ticket, view) = newer;
        }
    }

    /// Ticket of the newest published refresh of `resource`, `0` if none.
    ///
    /// Take it before looking up a tier and pass it to
    /// [`warm_process`](Self::warm_process).
    pub fn publication(&self, resource: Resource) -> u64 {
        self.published.get(&resource).map_or(0, |slot| slot.ticket)
    }

    /// Puts a view read from the distributed tier into the process tier,
    /// unless a refresh published after `seen` was taken.
    ///
    /// Returns whether the process tier was updated.
    pub fn warm_process(&self, resource: Resource, view: &Arc<AggregateView>, seen: u64) -> bool {
        if !resource.is_whole() {
            return false;
        }
        let entry = self.published.entry(resource);
        let newest = match &entry {
            Entry::Occupied(slot) => slot.get().ticket,
            Entry::Vacant(_) => 0,
        };
        if newest != seen {
            debug!(resource = %resource, "refresh published during lookup, not warming");
            return false;
        }
        self.process.set(resource, Arc::clone(view));
        drop(entry);
        true
    }

    async fn publish_page(
        &self,
        resource: Resource,
        key: CacheKey,
        view: &Arc<AggregateView>,
        generation: u64,
    ) {
        if !self
            .write_distributed(&key, view, self.options.page_ttl())
            .await
        {
            return;
        }
        if self.page_generation.load(Ordering::SeqCst) != generation {
            // Invalidated while computing; the page may predate the change.
            if let Err(e) = self.distributed.delete(key.as_str()).await {
                warn!(key = %key, error = %e, "failed to drop page computed before a change");
                self.page_keys.insert(key.into_string(), resource);
            }
            return;
        }
        self.page_keys.insert(key.into_string(), resource);
    }

    async fn write_distributed(
        &self,
        key: &CacheKey,
        view: &AggregateView,
        ttl: std::time::Duration,
    ) -> bool {
        let bytes = match self.codec.encode(view) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode view");
                return false;
            }
        };
        match self.distributed.set(key.as_str(), bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                CacheStatistics::incr(&self.stats.distributed_errors);
                warn!(
                    key = %key,
                    backend = self.distributed.backend(),
                    error = %e,
                    "distributed cache write failed"
                );
                false
            }
        }
    }

    /// Computes every whole aggregate once. Returns how many succeeded.
    pub async fn warm_all(&self) -> usize {
        let mut warmed = 0;
        for resource in Resource::whole() {
            if self.refresh(resource).await.is_ok() {
                warmed += 1;
            }
        }
        info!(warmed, total = Resource::whole().count(), "cache warm-up finished");
        warmed
    }

    /// Reacts to a change in one collection.
    ///
    /// Every whole aggregate depending on the collection is recomputed and
    /// every tracked page depending on it is dropped.
    pub async fn handle_change(&self, notification: &ChangeNotification) -> ChangeOutcome {
        let collection = notification.collection;
        debug!(
            collection = %collection,
            kind = %notification.kind,
            document_id = ?notification.document_id,
            "handling change notification"
        );

        let pages_dropped = self.invalidate_pages(collection).await;

        let targets: Vec<Resource> = Resource::whole()
            .filter(|r| r.depends_on(collection))
            .collect();
        let results = join_all(targets.iter().map(|r| self.refresh(*r))).await;

        let mut outcome = ChangeOutcome {
            pages_dropped,
            ..ChangeOutcome::default()
        };
        for (resource, result) in targets.into_iter().zip(results) {
            match result {
                Ok(_) => outcome.refreshed.push(resource),
                Err(_) => outcome.failed.push(resource),
            }
        }
        outcome
    }

    /// Drops every tracked page whose resource depends on `collection`.
    pub async fn invalidate_pages(&self, collection: Collection) -> usize {
        self.page_generation.fetch_add(1, Ordering::SeqCst);
        let keys: Vec<String> = self
            .page_keys
            .iter()
            .filter(|entry| entry.value().depends_on(collection))
            .map(|entry| entry.key().clone())
            .collect();

        let mut dropped = 0;
        for key in keys {
            match self.distributed.delete(&key).await {
                Ok(()) => {
                    self.page_keys.remove(&key);
                    dropped += 1;
                }
                Err(e) => {
                    CacheStatistics::incr(&self.stats.distributed_errors);
                    warn!(key = %key, error = %e, "failed to drop page, will retry on next change");
                }
            }
        }
        if dropped > 0 {
            self.stats
                .invalidations
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(collection = %collection, dropped, "dropped cached pages");
        }
        dropped
    }

    // ========================================================================
    // Source queries
    // ========================================================================

    /// Computes the view for `query` from the source store without publishing.
    pub async fn compute(&self, query: &ListingQuery) -> CacheResult<AggregateView> {
        let key = query.cache_key(self.namespace()).into_string();
        match query.resource() {
            Resource::States => self.compute_states(key).await,
            Resource::StatesSummary => self.compute_states_summary(key).await,
            Resource::CategoriesSummary => self.compute_categories_summary(key).await,
            Resource::Categories => {
                let page = query.page().unwrap_or(Page {
                    skip: 0,
                    limit: self.paging.categories_default_limit,
                });
                self.compute_categories(key, page).await
            }
            Resource::Schemes => self.compute_schemes(key, query).await,
        }
    }

    async fn compute_states(&self, key: String) -> CacheResult<AggregateView> {
        let options = FindOptions::new()
            .sort(Sort::asc("name"))
            .projection(["name", "slug", "image"]);
        let docs = self.store.find(Collection::States, &options).await?;
        let rows: Vec<StateListItem> = parse_rows(Resource::States, docs);
        Ok(AggregateView::from_rows(key, &rows)?)
    }

    async fn compute_states_summary(&self, key: String) -> CacheResult<AggregateView> {
        let pipeline = Pipeline::new()
            .sort(Sort::asc("name"))
            .lookup_count(Collection::Schemes, "_id", "state", "totalSchemes")
            .lookup_count(Collection::Discussions, "_id", "state", "totalDiscussions")
            .project(vec![
                ProjectField::rename("_id", "stateId"),
                ProjectField::include("name"),
                ProjectField::include("image"),
                ProjectField::include("slug"),
                ProjectField::include("totalSchemes"),
                ProjectField::include("totalDiscussions"),
            ]);
        let docs = self.store.aggregate(Collection::States, &pipeline).await?;
        let rows: Vec<StateSummary> = parse_rows(Resource::StatesSummary, docs);
        Ok(AggregateView::from_rows(key, &rows)?)
    }

    async fn compute_categories_summary(&self, key: String) -> CacheResult<AggregateView> {
        let pipeline = Pipeline::new()
            .sort(Sort::asc("name"))
            .lookup_count(Collection::Schemes, "_id", "category", "totalSchemes")
            .project(vec![
                ProjectField::rename("_id", "categoryId"),
                ProjectField::include("name"),
                ProjectField::include("image"),
                ProjectField::include("slug"),
                ProjectField::include("totalSchemes"),
            ]);
        let docs = self
            .store
            .aggregate(Collection::Categories, &pipeline)
            .await?;
        let rows: Vec<CategorySummary> = parse_rows(Resource::CategoriesSummary, docs);
        Ok(AggregateView::from_rows(key, &rows)?)
    }

    async fn compute_categories(&self, key: String, page: Page) -> CacheResult<AggregateView> {
        let options = FindOptions::new()
            .sort(Sort::asc("name"))
            .skip(page.skip)
            .limit(page.limit)
            .projection(["name", "description", "image", "slug"]);
        let docs = self.store.find(Collection::Categories, &options).await?;
        let rows: Vec<CategoryListItem> = parse_rows(Resource::Categories, docs);
        Ok(AggregateView::from_rows(key, &rows)?)
    }

    async fn compute_schemes(&self, key: String, query: &ListingQuery) -> CacheResult<AggregateView> {
        let page = query.page().unwrap_or(Page {
            skip: 0,
            limit: self.paging.schemes_default_limit,
        });
        let f = query.filter();

        let state_id = match &f.state_slug {
            Some(slug) => match self.resolve_slug(Collection::States, slug).await? {
                Some(id) => Some(id),
                None => return Ok(AggregateView::empty(key).with_total(0)),
            },
            None => f.state_id.clone(),
        };
        let category_id = match &f.category_slug {
            Some(slug) => match self.resolve_slug(Collection::Categories, slug).await? {
                Some(id) => Some(id),
                None => return Ok(AggregateView::empty(key).with_total(0)),
            },
            None => f.category_id.clone(),
        };

        let mut filter = Filter::new();
        if let Some(id) = state_id {
            filter = filter.eq("state", id);
        }
        if let Some(id) = category_id {
            filter = filter.eq("category", id);
        }

        let options = FindOptions::new()
            .filter(filter.clone())
            .sort(Sort::desc("createdAt"))
            .skip(page.skip)
            .limit(page.limit)
            .projection(SCHEME_CARD_FIELDS);
        let docs = self.store.find(Collection::Schemes, &options).await?;
        let total = self
            .store
            .count_documents(Collection::Schemes, &filter)
            .await?;

        let docs = self.populate_refs(docs).await?;
        let rows: Vec<SchemeCard> = parse_rows(Resource::Schemes, docs);
        Ok(AggregateView::from_rows(key, &rows)?.with_total(total))
    }

    async fn resolve_slug(&self, collection: Collection, slug: &str) -> CacheResult<Option<String>> {
        let doc = self
            .store
            .find_one(collection, &Filter::new().eq("slug", slug))
            .await?;
        let id = doc
            .as_ref()
            .and_then(|d| d.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if id.is_none() {
            debug!(collection = %collection, slug = %slug, "unknown slug, listing is empty");
        }
        Ok(id)
    }

    /// Replaces state and category ids with `{_id, name, slug}` objects.
    async fn populate_refs(&self, mut docs: Vec<Value>) -> CacheResult<Vec<Value>> {
        let mut state_ids = HashSet::new();
        let mut category_ids = HashSet::new();
        for doc in &docs {
            state_ids.extend(id_list(doc.get("state")));
            category_ids.extend(id_list(doc.get("category")));
        }
        let states = self.load_refs(Collection::States, state_ids).await?;
        let categories = self.load_refs(Collection::Categories, category_ids).await?;

        for doc in &mut docs {
            let state_refs: Vec<Value> = id_list(doc.get("state"))
                .into_iter()
                .filter_map(|id| states.get(&id).cloned())
                .collect();
            let category_ref = id_list(doc.get("category"))
                .into_iter()
                .find_map(|id| categories.get(&id).cloned());
            if let Value::Object(fields) = doc {
                fields.insert("state".to_string(), Value::Array(state_refs));
                match category_ref {
                    Some(r) => {
                        fields.insert("category".to_string(), r);
                    }
                    None => {
                        fields.remove("category");
                    }
                }
            }
        }
        Ok(docs)
    }

    async fn load_refs(
        &self,
        collection: Collection,
        ids: HashSet<String>,
    ) -> CacheResult<HashMap<String, Value>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        let options = FindOptions::new()
            .filter(Filter::new().in_values("_id", ids))
            .projection(["name", "slug"]);
        let docs = self.store.find(collection, &options).await?;

        let mut refs = HashMap::new();
        for doc in docs {
            match serde_json::from_value::<NamedRef>(doc) {
                Ok(named) => {
                    let id = named.id.clone();
                    refs.insert(id, serde_json::to_value(named)?);
                }
                Err(e) => warn!(collection = %collection, error = %e, "skipping malformed reference"),
            }
        }
        Ok(refs)
    }
}

impl std::fmt::Debug for RefreshOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshOrchestrator")
            .field("namespace", &self.options.namespace)
            .field("backend", &self.distributed.backend())
            .field("tracked_pages", &self.page_keys.len())
            .finish()
    }
}

/// Ids held by a reference field: a single id or an array of ids.
fn id_list(field: Option<&Value>) -> Vec<String> {
    match field {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Deserializes source rows, skipping documents that do not fit the row type.
fn parse_rows<T: DeserializeOwned>(resource: Resource, docs: Vec<Value>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value::<T>(doc) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(resource = %resource, error = %e, "skipping malformed source row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::testing::StallingCache;
    use crate::distributed::{DistributedCache, MemoryDistributedCache};
    use schemehub_storage::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        distributed: Arc<MemoryDistributedCache>,
        orchestrator: RefreshOrchestrator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        for (id, name, slug) in [("s1", "Beta", "beta"), ("s2", "Alpha", "alpha")] {
            store
                .insert(Collection::States, json!({"_id": id, "name": name, "slug": slug}))
                .await
                .unwrap();
        }
        store
            .insert(
                Collection::Categories,
                json!({"_id": "c1", "name": "Farming", "slug": "farming"}),
            )
            .await
            .unwrap();
        store
            .insert(
                Collection::Schemes,
                json!({
                    "_id": "x1",
                    "schemeTitle": "Old scheme",
                    "state": ["s1", "s2"],
                    "category": "c1",
                    "createdAt": "2024-01-01T00:00:00Z"
                }),
            )
            .await
            .unwrap();
        store
            .insert(
                Collection::Schemes,
                json!({
                    "_id": "x2",
                    "schemeTitle": "New scheme",
                    "state": ["s1"],
                    "createdAt": "2024-06-01T00:00:00Z"
                }),
            )
            .await
            .unwrap();

        let distributed = Arc::new(MemoryDistributedCache::new());
        let orchestrator = RefreshOrchestrator::new(
            store.clone(),
            distributed.clone(),
            Arc::new(ProcessCache::new()),
            &CacheSettings::default(),
            Arc::new(CacheStatistics::default()),
        );
        Fixture {
            store,
            distributed,
            orchestrator,
        }
    }

    fn schemes(params: &[(&str, &str)]) -> ListingQuery {
        ListingQuery::parse("schemes", params.iter().copied(), &PagingSettings::default())
            .unwrap()
    }

    #[tokio::test]
    async fn states_summary_counts_and_sorts() {
        let fx = fixture().await;
        let view = fx.orchestrator.refresh(Resource::StatesSummary).await.unwrap();
        let rows: Vec<StateSummary> = view.rows_as().unwrap();
        assert_eq!(rows[0].name, "Alpha");
        assert_eq!(rows[0].total_schemes, 1);
        assert_eq!(rows[1].name, "Beta");
        assert_eq!(rows[1].total_schemes, 2);
        assert_eq!(view.key, "schemehub:statesSummary");

        assert!(fx.orchestrator.process().get(Resource::StatesSummary).is_some());
        assert!(fx.distributed.contains_key("schemehub:statesSummary"));
    }

    #[tokio::test]
    async fn schemes_are_newest_first_with_refs_populated() {
        let fx = fixture().await;
        let view = fx.orchestrator.compute(&schemes(&[])).await.unwrap();
        assert_eq!(view.total, Some(2));
        let cards: Vec<SchemeCard> = view.rows_as().unwrap();
        assert_eq!(cards[0].id, "x2");
        assert_eq!(cards[1].id, "x1");
        assert_eq!(cards[1].state.len(), 2);
        assert_eq!(cards[1].category.as_ref().unwrap().name, "Farming");
        assert!(cards[0].category.is_none());
    }

    #[tokio::test]
    async fn scheme_filters_by_slug_and_pages() {
        let fx = fixture().await;
        let view = fx
            .orchestrator
            .compute(&schemes(&[("stateSlug", "alpha")]))
            .await
            .unwrap();
        assert_eq!(view.total, Some(1));
        assert_eq!(view.rows[0]["_id"], "x1");

        let view = fx
            .orchestrator
            .compute(&schemes(&[("stateId", "s1"), ("limit", "1"), ("skip", "1")]))
            .await
            .unwrap();
        assert_eq!(view.total, Some(2));
        assert_eq!(view.len(), 1);
        assert_eq!(view.rows[0]["_id"], "x1");
    }

    #[tokio::test]
    async fn unknown_slug_is_an_empty_view() {
        let fx = fixture().await;
        let view = fx
            .orchestrator
            .compute(&schemes(&[("categorySlug", "nowhere")]))
            .await
            .unwrap();
        assert!(view.is_empty());
        assert_eq!(view.total, Some(0));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entries() {
        let fx = fixture().await;
        let first = fx.orchestrator.refresh(Resource::States).await.unwrap();

        fx.store.set_offline(true);
        let err = fx.orchestrator.refresh(Resource::States).await.unwrap_err();
        assert!(err.is_retryable());

        let held = fx.orchestrator.process().get(Resource::States).unwrap();
        assert!(Arc::ptr_eq(&held, &first));
        assert!(fx.distributed.contains_key("schemehub:states"));
        assert_eq!(fx.orchestrator.stats().snapshot().refresh_failures, 1);
    }

    #[tokio::test]
    async fn change_drops_dependent_pages_and_refreshes_aggregates() {
        let fx = fixture().await;
        let page = ListingQuery::parse(
            "categories",
            Vec::<(&str, &str)>::new(),
            &PagingSettings::default(),
        )
        .unwrap();
        fx.orchestrator.refresh_query(&page).await.unwrap();
        fx.orchestrator.refresh_query(&schemes(&[])).await.unwrap();
        assert_eq!(fx.orchestrator.tracked_pages(), 2);

        let outcome = fx
            .orchestrator
            .handle_change(&ChangeNotification::updated(Collection::Categories, "c1"))
            .await;
        assert_eq!(outcome.pages_dropped, 2);
        assert_eq!(outcome.refreshed, vec![Resource::CategoriesSummary]);
        assert!(outcome.failed.is_empty());
        assert_eq!(fx.orchestrator.tracked_pages(), 0);
        assert!(
            fx.distributed
                .get("schemehub:categories?limit=11&skip=0")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn discussions_only_touch_states_summary() {
        let fx = fixture().await;
        fx.orchestrator.refresh_query(&schemes(&[])).await.unwrap();
        let outcome = fx
            .orchestrator
            .handle_change(&ChangeNotification::inserted(Collection::Discussions, "d1"))
            .await;
        assert_eq!(outcome.refreshed, vec![Resource::StatesSummary]);
        assert_eq!(outcome.pages_dropped, 0);
        assert_eq!(fx.orchestrator.tracked_pages(), 1);
    }

    #[tokio::test]
    async fn late_distributed_write_yields_to_newer_refresh() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(Collection::States, json!({"_id": "s1", "name": "Alpha"}))
            .await
            .unwrap();
        let distributed = Arc::new(
            StallingCache::default().with_first_set_delay(Duration::from_millis(200)),
        );
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            store.clone(),
            distributed.clone(),
            Arc::new(ProcessCache::new()),
            &CacheSettings::default(),
            Arc::new(CacheStatistics::default()),
        ));

        let older = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.refresh(Resource::States).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .insert(Collection::States, json!({"_id": "s2", "name": "Beta"}))
            .await
            .unwrap();
        let newer = orchestrator.refresh(Resource::States).await.unwrap();
        assert_eq!(newer.len(), 2);
        assert_eq!(older.await.unwrap().unwrap().len(), 1);

        let bytes = distributed.get("schemehub:states").await.unwrap().unwrap();
        let stored: AggregateView = orchestrator.codec().decode(&bytes).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(orchestrator.process().get(Resource::States).unwrap().len(), 2);
        assert_eq!(orchestrator.publication(Resource::States), 2);
    }

    #[tokio::test]
    async fn warm_process_respects_newer_publications() {
        let fx = fixture().await;
        let seen = fx.orchestrator.publication(Resource::States);
        assert_eq!(seen, 0);
        let fresh = fx.orchestrator.refresh(Resource::States).await.unwrap();

        let stale = Arc::new(AggregateView::empty("schemehub:states"));
        assert!(!fx.orchestrator.warm_process(Resource::States, &stale, seen));
        let held = fx.orchestrator.process().get(Resource::States).unwrap();
        assert!(Arc::ptr_eq(&held, &fresh));

        let seen = fx.orchestrator.publication(Resource::States);
        fx.orchestrator.process().clear_all();
        assert!(fx.orchestrator.warm_process(Resource::States, &fresh, seen));
        assert!(fx.orchestrator.process().get(Resource::States).is_some());
    }

    #[tokio::test]
    async fn refresh_uses_configured_page_size() {
        let fx = fixture().await;
        for name in ["Health", "Education"] {
            fx.store
                .insert(Collection::Categories, json!({"name": name}))
                .await
                .unwrap();
        }
        let mut settings = CacheSettings::default();
        settings.paging.categories_default_limit = 2;
        let orchestrator = RefreshOrchestrator::new(
            fx.store.clone(),
            fx.distributed.clone(),
            Arc::new(ProcessCache::new()),
            &settings,
            Arc::new(CacheStatistics::default()),
        );

        let view = orchestrator.refresh(Resource::Categories).await.unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.key, "schemehub:categories?limit=2&skip=0");
        assert_eq!(orchestrator.tracked_pages(), 1);
    }

    #[tokio::test]
    async fn warm_all_fills_every_slot() {
        let fx = fixture().await;
        assert_eq!(fx.orchestrator.warm_all().await, 3);
        assert_eq!(fx.orchestrator.process().len(), 3);
    }
}
