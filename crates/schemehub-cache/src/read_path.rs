//! Request-time lookup across the three tiers.
//!
//! ## Lookup Order
//!
//! 1. Process cache (whole aggregates only) - no I/O
//! 2. Distributed cache by key - one round-trip plus decode
//! 3. Source store through the orchestrator, which publishes the result
//!
//! A distributed hit on a whole aggregate warms the process tier, unless a
//! refresh published a newer view while the lookup was running. Corrupt
//! entries and distributed-cache outages are treated as misses; only a
//! failing source store reaches the caller.

use std::fmt;
use std::sync::Arc;

use schemehub_core::AggregateView;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, ListingQuery};
use crate::orchestrator::RefreshOrchestrator;
use crate::stats::CacheStatistics;

/// The tier that answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Process,
    Distributed,
    Source,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Process => "process",
            Tier::Distributed => "distributed",
            Tier::Source => "source",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A view and where it came from.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub view: Arc<AggregateView>,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub struct ReadPath {
    orchestrator: Arc<RefreshOrchestrator>,
}

impl ReadPath {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Returns the view for `query` from the fastest tier that has it.
    ///
    /// # Errors
    ///
    /// `CacheError::SourceUnavailable` when no tier holds the view and the
    /// source store cannot compute it.
    pub async fn get(&self, query: &ListingQuery) -> CacheResult<Lookup> {
        let resource = query.resource();
        let stats = self.orchestrator.stats();
        let seen = self.orchestrator.publication(resource);

        if resource.is_whole() {
            if let Some(view) = self.orchestrator.process().get(resource) {
                debug!(resource = %resource, "cache hit (process)");
                stats.record_hit(Tier::Process);
                return Ok(Lookup {
                    view,
                    tier: Tier::Process,
                });
            }
        }

        let key = query.cache_key(self.orchestrator.namespace());
        if let Some(view) = self.read_distributed(&key).await {
            debug!(key = %key, "cache hit (distributed)");
            stats.record_hit(Tier::Distributed);
            let view = Arc::new(view);
            self.orchestrator.warm_process(resource, &view, seen);
            return Ok(Lookup {
                view,
                tier: Tier::Distributed,
            });
        }

        debug!(key = %key, "cache miss, computing from source");
        stats.record_hit(Tier::Source);
        let view = self.orchestrator.refresh_query(query).await?;
        Ok(Lookup {
            view,
            tier: Tier::Source,
        })
    }

    async fn read_distributed(&self, key: &CacheKey) -> Option<AggregateView> {
        let distributed = self.orchestrator.distributed();
        let stats = self.orchestrator.stats();

        let bytes = match distributed.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                CacheStatistics::incr(&stats.distributed_errors);
                warn!(
                    key = %key,
                    backend = distributed.backend(),
                    error = %e,
                    "distributed cache read failed, skipping tier"
                );
                return None;
            }
        };

        let decoded = self
            .orchestrator
            .codec()
            .decode::<AggregateView>(&bytes)
            .and_then(|view| {
                if view.key == key.as_str() {
                    Ok(view)
                } else {
                    Err(CacheError::corrupt(format!(
                        "entry holds view {:?}",
                        view.key
                    )))
                }
            });

        match decoded {
            Ok(view) => Some(view),
            Err(e) => {
                CacheStatistics::incr(&stats.corrupt_entries);
                warn!(key = %key, error = %e, "dropping corrupt cache entry");
                if let Err(e) = distributed.delete(key.as_str()).await {
                    debug!(key = %key, error = %e, "failed to delete corrupt entry");
                }
                None
            }
        }
    }
}
