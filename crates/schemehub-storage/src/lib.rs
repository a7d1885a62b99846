//! Source store abstraction for SchemeHub.
//!
//! The source store is the authoritative document database behind every
//! cached listing. This crate defines:
//!
//! - [`SourceStore`]: the query and watch contract the caching core consumes
//! - [`Filter`], [`FindOptions`], [`Pipeline`]: backend-neutral query types
//! - [`StorageError`]: failures a backend can report
//! - [`InMemoryStore`]: a document store that emits change notifications
//!
//! # Example
//!
//! ```ignore
//! use schemehub_storage::{InMemoryStore, SourceStore, FindOptions, Sort};
//! use schemehub_core::Collection;
//!
//! let store = InMemoryStore::new();
//! store.insert(Collection::States, json!({"name": "Kerala", "slug": "kerala"})).await?;
//!
//! let states = store
//!     .find(Collection::States, &FindOptions::new().sort(Sort::asc("name")))
//!     .await?;
//! ```

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use memory::InMemoryStore;
pub use traits::{ChangeStream, DynSourceStore, SourceStore};
pub use types::{
    Condition, Filter, FindOptions, Pipeline, ProjectField, Sort, SortDirection, Stage,
};
