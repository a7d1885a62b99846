//! Change notification system for cache invalidation.
//!
//! Writers to the source database publish a [`ChangeNotification`] per
//! changed document; the caching core consumes them as refresh triggers.
//!
//! ```text
//! write ──► ChangeBroadcaster ──► watch stream ──► refresh task
//!           (tokio broadcast)      (per collection)
//! ```
//!
//! A notification is a trigger, not a diff: consumers recompute whatever
//! depends on the collection and never inspect the document itself.

pub mod broadcaster;
pub mod types;

pub use broadcaster::ChangeBroadcaster;
pub use types::{ChangeKind, ChangeNotification};
