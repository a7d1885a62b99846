//! In-memory document store.
//!
//! Documents live in insertion order per collection behind a single async
//! `RwLock`, so an aggregation that reads several collections sees one
//! consistent snapshot. Every successful write is published on a
//! [`ChangeBroadcaster`], which backs [`SourceStore::watch`].
//!
//! The store can be switched offline to exercise outage handling; while
//! offline every operation fails with [`StorageError::Unavailable`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use indexmap::IndexMap;
use schemehub_core::{
    ChangeBroadcaster, ChangeKind, ChangeNotification, Collection, generate_id, validate_id,
};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::traits::{ChangeStream, SourceStore};
use crate::types::{
    Filter, FindOptions, Pipeline, Stage, field_matches, project_fields, project_stage,
    sort_documents,
};

type Documents = IndexMap<String, Value>;

/// In-memory source store.
#[derive(Debug)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, Documents>>,
    broadcaster: Arc<ChangeBroadcaster>,
    offline: AtomicBool,
    /// Read queries served (find, count, aggregate)
    queries: AtomicU64,
}

impl InMemoryStore {
    /// Creates an empty store with its own broadcaster.
    pub fn new() -> Self {
        Self::with_broadcaster(ChangeBroadcaster::new_shared())
    }

    /// Creates an empty store publishing to an existing broadcaster.
    pub fn with_broadcaster(broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            broadcaster,
            offline: AtomicBool::new(false),
            queries: AtomicU64::new(0),
        }
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of read queries served since creation or the last reset.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.is_offline() {
            Err(StorageError::unavailable("in-memory store is offline"))
        } else {
            Ok(())
        }
    }

    fn begin_query(&self) -> Result<(), StorageError> {
        self.ensure_online()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Inserts a document, assigning `_id` and `createdAt` when absent.
    ///
    /// Returns the document id.
    pub async fn insert(&self, collection: Collection, doc: Value) -> Result<String, StorageError> {
        self.ensure_online()?;
        let Value::Object(mut fields) = doc else {
            return Err(StorageError::invalid_document("document must be a JSON object"));
        };

        let id = match fields.get("_id") {
            Some(Value::String(id)) => {
                validate_id(id).map_err(|e| StorageError::invalid_document(e.to_string()))?;
                id.clone()
            }
            Some(_) => return Err(StorageError::invalid_document("_id must be a string")),
            None => generate_id(),
        };
        fields.insert("_id".to_string(), Value::String(id.clone()));
        if !fields.contains_key("createdAt") {
            fields.insert("createdAt".to_string(), Value::String(now_rfc3339()));
        }

        {
            let mut guard = self.collections.write().await;
            let docs = guard.entry(collection).or_default();
            if docs.contains_key(&id) {
                return Err(StorageError::already_exists(collection, id));
            }
            docs.insert(id.clone(), Value::Object(fields));
        }

        let subscribers = self.broadcaster.send_inserted(collection, id.clone());
        debug!(collection = %collection, id = %id, subscribers, "document inserted");
        Ok(id)
    }

    /// Merges the fields of `patch` into an existing document.
    ///
    /// `_id` and `createdAt` cannot be changed. Returns the updated document.
    pub async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, StorageError> {
        self.ensure_online()?;
        let Value::Object(patch) = patch else {
            return Err(StorageError::invalid_document("patch must be a JSON object"));
        };

        let updated = {
            let mut guard = self.collections.write().await;
            let doc = guard
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StorageError::not_found(collection, id))?;
            if let Value::Object(fields) = doc {
                for (key, value) in patch {
                    if key == "_id" || key == "createdAt" {
                        continue;
                    }
                    fields.insert(key, value);
                }
                fields.insert("updatedAt".to_string(), Value::String(now_rfc3339()));
            }
            doc.clone()
        };

        self.broadcaster.send_updated(collection, id);
        debug!(collection = %collection, id = %id, "document updated");
        Ok(updated)
    }

    /// Replaces a document wholesale, keeping its `_id` and `createdAt`.
    pub async fn replace(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
    ) -> Result<(), StorageError> {
        self.ensure_online()?;
        let Value::Object(mut fields) = doc else {
            return Err(StorageError::invalid_document("document must be a JSON object"));
        };

        {
            let mut guard = self.collections.write().await;
            let existing = guard
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StorageError::not_found(collection, id))?;
            fields.insert("_id".to_string(), Value::String(id.to_string()));
            if let Some(created) = existing.get("createdAt").cloned() {
                fields.insert("createdAt".to_string(), created);
            }
            *existing = Value::Object(fields);
        }

        self.broadcaster.send(ChangeNotification::new(
            collection,
            ChangeKind::Replace,
            Some(id.to_string()),
        ));
        debug!(collection = %collection, id = %id, "document replaced");
        Ok(())
    }

    /// Deletes a document and returns it.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<Value, StorageError> {
        self.ensure_online()?;
        let removed = {
            let mut guard = self.collections.write().await;
            guard
                .get_mut(&collection)
                .and_then(|docs| docs.shift_remove(id))
                .ok_or_else(|| StorageError::not_found(collection, id))?
        };

        self.broadcaster.send_deleted(collection, id);
        debug!(collection = %collection, id = %id, "document deleted");
        Ok(removed)
    }

    /// Reads a document by id without counting it as a listing query.
    pub async fn get(&self, collection: Collection, id: &str) -> Option<Value> {
        let guard = self.collections.read().await;
        guard.get(&collection).and_then(|docs| docs.get(id)).cloned()
    }

    /// Number of documents in `collection`.
    pub async fn len(&self, collection: Collection) -> usize {
        let guard = self.collections.read().await;
        guard.get(&collection).map_or(0, IndexMap::len)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn matching(docs: Option<&Documents>, filter: &Filter) -> Vec<Value> {
    docs.map(|docs| {
        docs.values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect()
    })
    .unwrap_or_default()
}

fn page(docs: Vec<Value>, skip: u64, limit: Option<u64>) -> Vec<Value> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let iter = docs.into_iter().skip(skip);
    match limit {
        Some(limit) => iter.take(usize::try_from(limit).unwrap_or(usize::MAX)).collect(),
        None => iter.collect(),
    }
}

fn run_pipeline(
    data: &HashMap<Collection, Documents>,
    collection: Collection,
    pipeline: &Pipeline,
) -> Vec<Value> {
    let mut docs = matching(data.get(&collection), &Filter::new());
    for stage in pipeline.stages() {
        match stage {
            Stage::Match(filter) => docs.retain(|doc| filter.matches(doc)),
            Stage::Sort(sorts) => sort_documents(&mut docs, sorts),
            Stage::Skip(n) => docs = page(docs, *n, None),
            Stage::Limit(n) => docs = page(docs, 0, Some(*n)),
            Stage::LookupCount {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let foreign = data.get(from);
                for doc in &mut docs {
                    let local = doc.get(local_field).cloned().unwrap_or(Value::Null);
                    let count = foreign.map_or(0, |f| {
                        f.values()
                            .filter(|other| field_matches(other.get(foreign_field), &local))
                            .count()
                    });
                    if let Value::Object(fields) = doc {
                        fields.insert(as_field.clone(), Value::from(count));
                    }
                }
            }
            Stage::Project(fields) => {
                docs = docs.iter().map(|doc| project_stage(doc, fields)).collect();
            }
        }
    }
    docs
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn find(
        &self,
        collection: Collection,
        options: &FindOptions,
    ) -> Result<Vec<Value>, StorageError> {
        self.begin_query()?;
        let guard = self.collections.read().await;
        let mut docs = matching(guard.get(&collection), &options.filter);
        drop(guard);

        sort_documents(&mut docs, &options.sort);
        let docs = page(docs, options.skip, options.limit);
        Ok(match &options.projection {
            Some(fields) => docs.iter().map(|doc| project_fields(doc, fields)).collect(),
            None => docs,
        })
    }

    async fn count_documents(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<u64, StorageError> {
        self.begin_query()?;
        let guard = self.collections.read().await;
        let count = guard
            .get(&collection)
            .map_or(0, |docs| docs.values().filter(|doc| filter.matches(doc)).count());
        Ok(count as u64)
    }

    async fn aggregate(
        &self,
        collection: Collection,
        pipeline: &Pipeline,
    ) -> Result<Vec<Value>, StorageError> {
        self.begin_query()?;
        let guard = self.collections.read().await;
        Ok(run_pipeline(&guard, collection, pipeline))
    }

    async fn watch(&self, collection: Collection) -> Result<ChangeStream, StorageError> {
        self.ensure_online()?;
        let receiver = self.broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| async move {
            match item {
                Ok(notification) if notification.collection == collection => Some(notification),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(collection = %collection, skipped, "change stream lagged, forcing resync");
                    Some(ChangeNotification::resync(collection))
                }
            }
        });
        Ok(stream.boxed())
    }
}
