//! Multi-tier read-path cache for SchemeHub listings.
//!
//! Listings are served from the fastest tier that holds them:
//!
//! | Tier | Holds | Freshness |
//! |------|-------|-----------|
//! | [`ProcessCache`] | whole aggregates | replaced on every refresh |
//! | [`DistributedCache`] | whole aggregates and pages | TTL, pages dropped on change |
//! | Source store | everything | authoritative |
//!
//! Writes reach the source store only. A change notification for a
//! collection makes the [`RefreshOrchestrator`] recompute the aggregates that
//! depend on it and drop dependent pages, so readers may see the previous
//! value until that refresh completes.

pub mod codec;
pub mod config;
pub mod distributed;
pub mod error;
pub mod feed;
pub mod key;
pub mod listener;
pub mod observability;
pub mod orchestrator;
pub mod process;
pub mod read_path;
pub mod service;
pub mod stats;

pub use codec::PayloadCodec;
pub use config::{CacheOptions, CacheSettings, LoggingSettings, PagingSettings, RedisSettings};
pub use distributed::{
    DistributedCache, DynDistributedCache, MemoryDistributedCache, RedisDistributedCache,
    create_distributed_cache, create_redis_pool,
};
pub use error::{CacheError, CacheResult};
pub use feed::{
    ChangeFeed, DynChangeFeed, RedisChangeFeed, StoreChangeFeed, change_channel, publish_change,
};
pub use key::{CacheKey, ListingQuery, Page, QueryParams, Resource, SchemeFilter};
pub use listener::ChangeListener;
pub use observability::{apply_logging, build_filter, init_tracing};
pub use orchestrator::{ChangeOutcome, RefreshOrchestrator};
pub use process::ProcessCache;
pub use read_path::{Lookup, ReadPath, Tier};
pub use service::ListingCache;
pub use stats::{CacheStatistics, CacheStatsSnapshot};
