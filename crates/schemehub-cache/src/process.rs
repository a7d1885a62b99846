//! Process-local tier.
//!
//! One slot per whole aggregate, fixed at construction. Each slot is an
//! [`ArcSwapOption`], so readers never block and a `set` replaces the whole
//! view atomically: a concurrent reader sees the old view or the new one,
//! never a mix. Entries carry no TTL; the orchestrator keeps them fresh.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use schemehub_core::AggregateView;

use crate::key::Resource;

pub struct ProcessCache {
    slots: HashMap<Resource, ArcSwapOption<AggregateView>>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self {
            slots: Resource::whole()
                .map(|r| (r, ArcSwapOption::empty()))
                .collect(),
        }
    }

    /// Current view of `resource`, if one has been published.
    pub fn get(&self, resource: Resource) -> Option<Arc<AggregateView>> {
        self.slots.get(&resource).and_then(|slot| slot.load_full())
    }

    /// Replaces the view of `resource` (last writer wins).
    ///
    /// Returns `false` for paginated resources, which have no slot.
    pub fn set(&self, resource: Resource, view: Arc<AggregateView>) -> bool {
        match self.slots.get(&resource) {
            Some(slot) => {
                slot.store(Some(view));
                true
            }
            None => {
                tracing::debug!(resource = %resource, "no process slot for paginated resource");
                false
            }
        }
    }

    pub fn clear(&self, resource: Resource) {
        if let Some(slot) = self.slots.get(&resource) {
            slot.store(None);
        }
    }

    pub fn clear_all(&self) {
        for slot in self.slots.values() {
            slot.store(None);
        }
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.load().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCache")
            .field("slots", &self.slots.len())
            .field("populated", &self.len())
            .finish()
    }
}
