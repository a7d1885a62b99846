//! Integration tests for the in-memory source store.

use futures_util::StreamExt;
use schemehub_core::{ChangeKind, Collection};
use schemehub_storage::{
    DynSourceStore, Filter, FindOptions, InMemoryStore, Pipeline, ProjectField, Sort, SourceStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn seeded() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert(Collection::States, json!({"_id": "s1", "name": "Beta", "slug": "beta"}))
        .await
        .unwrap();
    store
        .insert(Collection::States, json!({"_id": "s2", "name": "Alpha", "slug": "alpha"}))
        .await
        .unwrap();
    store
        .insert(
            Collection::Schemes,
            json!({"_id": "x1", "schemeTitle": "X1", "state": ["s1"], "createdAt": "2024-01-01T00:00:00Z"}),
        )
        .await
        .unwrap();
    store
        .insert(
            Collection::Schemes,
            json!({"_id": "x2", "schemeTitle": "X2", "state": ["s1", "s2"], "createdAt": "2024-02-01T00:00:00Z"}),
        )
        .await
        .unwrap();
    store
        .insert(Collection::Discussions, json!({"_id": "d1", "state": "s2"}))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn summary_pipeline_counts_both_collections() {
    let store: DynSourceStore = seeded().await;
    let pipeline = Pipeline::new()
        .sort(Sort::asc("name"))
        .lookup_count(Collection::Schemes, "_id", "state", "totalSchemes")
        .lookup_count(Collection::Discussions, "_id", "state", "totalDiscussions")
        .project(vec![
            ProjectField::rename("_id", "stateId"),
            ProjectField::include("name"),
            ProjectField::include("totalSchemes"),
            ProjectField::include("totalDiscussions"),
        ]);

    let rows = store.aggregate(Collection::States, &pipeline).await.unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"stateId": "s2", "name": "Alpha", "totalSchemes": 1, "totalDiscussions": 1}),
            json!({"stateId": "s1", "name": "Beta", "totalSchemes": 2, "totalDiscussions": 0}),
        ]
    );
    assert_eq!(
        pipeline.foreign_collections(),
        vec![Collection::Schemes, Collection::Discussions]
    );
}

#[tokio::test]
async fn newest_schemes_first_for_state() {
    let store = seeded().await;
    let options = FindOptions::new()
        .filter(Filter::new().eq("state", "s1"))
        .sort(Sort::desc("createdAt"))
        .limit(4);
    let docs = store.find(Collection::Schemes, &options).await.unwrap();
    let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["x2", "x1"]);
}

#[tokio::test]
async fn watchers_see_writes_in_order() {
    let store = seeded().await;
    let mut stream = store.watch(Collection::Schemes).await.unwrap();

    store
        .update(Collection::Schemes, "x1", json!({"schemeTitle": "X1b"}))
        .await
        .unwrap();
    store.delete(Collection::Schemes, "x2").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, ChangeKind::Update);
    assert_eq!(second.kind, ChangeKind::Delete);
    assert_eq!(second.document_id.as_deref(), Some("x2"));
}
