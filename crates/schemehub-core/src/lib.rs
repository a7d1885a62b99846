//! Core vocabulary for the SchemeHub listing cache.
//!
//! This crate holds the types shared by the storage layer and the caching
//! core: the collections of the portal database, entity ids, change
//! notifications, the typed rows of every listing, and [`AggregateView`],
//! the precomputed result set that moves between cache tiers.

pub mod collection;
pub mod error;
pub mod events;
pub mod id;
pub mod rows;
pub mod view;

pub use collection::Collection;
pub use error::{CoreError, Result};
pub use events::{ChangeBroadcaster, ChangeKind, ChangeNotification};
pub use id::{generate_id, validate_id, IdError};
pub use rows::{CategoryListItem, CategorySummary, NamedRef, SchemeCard, StateListItem, StateSummary};
pub use view::AggregateView;
