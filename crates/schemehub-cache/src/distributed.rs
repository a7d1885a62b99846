//! Distributed tier: a key-value store with per-key TTL.
//!
//! ## Backends
//!
//! - **Memory**: single-instance mode, a DashMap with expiry
//! - **Redis**: shared by every instance through a deadpool connection pool
//!
//! Backends report failures as [`CacheError::CacheUnavailable`]; the Read
//! Path turns those into a miss.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::config::RedisSettings;
use crate::error::CacheError;

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`, replacing any previous entry and its TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

pub type DynDistributedCache = Arc<dyn DistributedCache>;

// ============================================================================
// Memory backend
// ============================================================================

/// A stored entry with TTL support.
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Vec<u8>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// In-process stand-in for the shared store.
///
/// Can be switched offline to exercise the degraded read path.
#[derive(Debug, Default)]
pub struct MemoryDistributedCache {
    entries: DashMap<String, CachedEntry>,
    offline: AtomicBool,
}

impl MemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored entries, expired ones included until next read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Drops every entry, as if all TTLs had elapsed.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::cache_unavailable("memory cache is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedCache for MemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_online()?;
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_online()?;
        self.entries.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Redis backend
// ============================================================================

#[derive(Clone)]
pub struct RedisDistributedCache {
    pool: Pool,
}

impl RedisDistributedCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check if Redis is reachable (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to get Redis connection");
            CacheError::cache_unavailable(e.to_string())
        })
    }
}

impl std::fmt::Debug for RedisDistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisDistributedCache")
            .field("pool_size", &status.size)
            .field("pool_available", &status.available)
            .finish()
    }
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Redis GET error");
            CacheError::cache_unavailable(e.to_string())
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| {
                tracing::warn!(key = %key, error = %e, "Redis SET error");
                CacheError::cache_unavailable(e.to_string())
            })?;
        tracing::debug!(key = %key, ttl_secs = %ttl_secs, "distributed cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Redis DEL error");
            CacheError::cache_unavailable(e.to_string())
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Builds a deadpool Redis pool from settings.
pub fn create_redis_pool(settings: &RedisSettings) -> Result<Pool, CacheError> {
    let mut redis_config = deadpool_redis::Config::from_url(&settings.url);
    let timeout = Duration::from_millis(settings.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(settings.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::cache_unavailable(format!("failed to create Redis pool: {e}")))
}

/// Creates the distributed tier.
///
/// Returns the Redis backend when enabled and reachable; otherwise falls
/// back to the in-memory backend so a single instance still works.
pub async fn create_distributed_cache(settings: &RedisSettings) -> DynDistributedCache {
    if !settings.enabled {
        tracing::info!("Redis disabled, using in-memory distributed cache");
        return Arc::new(MemoryDistributedCache::new());
    }

    tracing::info!(url = %settings.url, "Connecting to Redis");
    let pool = match create_redis_pool(settings) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Falling back to in-memory distributed cache");
            return Arc::new(MemoryDistributedCache::new());
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Arc::new(RedisDistributedCache::new(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory distributed cache."
            );
            Arc::new(MemoryDistributedCache::new())
        }
    }
}
