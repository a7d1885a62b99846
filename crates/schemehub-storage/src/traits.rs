//! The source store contract.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use schemehub_core::{ChangeNotification, Collection};
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{Filter, FindOptions, Pipeline};

/// Stream of change notifications for one watched collection.
pub type ChangeStream = BoxStream<'static, ChangeNotification>;

/// The authoritative document database behind every cached listing.
///
/// Query results are opaque JSON documents; callers project them into
/// their own row types. Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use schemehub_storage::{SourceStore, Filter, StorageError};
///
/// async fn state_by_slug(store: &dyn SourceStore, slug: &str) -> Result<Option<Value>, StorageError> {
///     store
///         .find_one(Collection::States, &Filter::new().eq("slug", slug))
///         .await
/// }
/// ```
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Returns the documents matching `options`, sorted, skipped and limited.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` when the store cannot be reached.
    async fn find(
        &self,
        collection: Collection,
        options: &FindOptions,
    ) -> Result<Vec<Value>, StorageError>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Value>, StorageError> {
        let options = FindOptions::new().filter(filter.clone()).limit(1);
        Ok(self.find(collection, &options).await?.into_iter().next())
    }

    /// Counts the documents matching `filter`.
    async fn count_documents(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<u64, StorageError>;

    /// Runs an aggregation pipeline over `collection`.
    async fn aggregate(
        &self,
        collection: Collection,
        pipeline: &Pipeline,
    ) -> Result<Vec<Value>, StorageError>;

    /// Opens a change stream for `collection`.
    ///
    /// The stream ends when the underlying connection is lost; callers are
    /// expected to re-open it.
    async fn watch(&self, collection: Collection) -> Result<ChangeStream, StorageError>;
}

/// Type alias for a shareable source store.
pub type DynSourceStore = Arc<dyn SourceStore>;
