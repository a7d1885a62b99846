//! Cache settings.
//!
//! Settings come from an optional TOML file overlaid by `SCHEMEHUB__*`
//! environment variables, e.g. `SCHEMEHUB__CACHE__PAGE_TTL_SECS=600`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Distributed cache connection
    #[serde(default)]
    pub redis: RedisSettings,
    /// Tier policy
    #[serde(default)]
    pub cache: CacheOptions,
    /// Listing pagination
    #[serde(default)]
    pub paging: PagingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err("redis.url must be set when redis is enabled".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.namespace.trim().is_empty() {
            return Err("cache.namespace must not be empty".into());
        }
        if self.cache.namespace.contains(['?', '&', '=', ':']) {
            return Err("cache.namespace must not contain '?', '&', '=' or ':'".into());
        }
        if self.cache.aggregate_ttl_secs == 0 || self.cache.page_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.paging.max_page_limit == 0 {
            return Err("paging.max_page_limit must be > 0".into());
        }
        if self.paging.schemes_default_limit == 0
            || self.paging.categories_default_limit == 0
        {
            return Err("paging default limits must be > 0".into());
        }
        if self.paging.schemes_default_limit > self.paging.max_page_limit
            || self.paging.categories_default_limit > self.paging.max_page_limit
        {
            return Err("paging default limits must be <= paging.max_page_limit".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        crate::observability::build_filter(&self.logging)?;
        Ok(())
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Use Redis as the distributed tier (falls back to memory without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Tier policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Prefix of every distributed cache key and change channel
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// TTL of whole aggregates in the distributed tier (default: 7 days)
    #[serde(default = "default_aggregate_ttl_secs")]
    pub aggregate_ttl_secs: u64,

    /// TTL of paginated listings in the distributed tier (default: 1 hour)
    #[serde(default = "default_page_ttl_secs")]
    pub page_ttl_secs: u64,

    /// Serialized payloads at least this large are gzip-compressed
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Compute every whole aggregate during `init()`
    #[serde(default = "default_warm_on_start")]
    pub warm_on_start: bool,

    /// Coalescing window for change notifications; 0 disables debouncing
    #[serde(default)]
    pub debounce_ms: u64,
}

fn default_namespace() -> String {
    "schemehub".to_string()
}

fn default_aggregate_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_page_ttl_secs() -> u64 {
    3600
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_warm_on_start() -> bool {
    true
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            aggregate_ttl_secs: default_aggregate_ttl_secs(),
            page_ttl_secs: default_page_ttl_secs(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            warm_on_start: default_warm_on_start(),
            debounce_ms: 0,
        }
    }
}

impl CacheOptions {
    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_ttl_secs)
    }

    pub fn page_ttl(&self) -> Duration {
        Duration::from_secs(self.page_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Listing pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingSettings {
    #[serde(default = "default_schemes_limit")]
    pub schemes_default_limit: u64,
    #[serde(default = "default_categories_limit")]
    pub categories_default_limit: u64,
    /// Upper bound for any requested `limit`
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u64,
}

fn default_schemes_limit() -> u64 {
    4
}

fn default_categories_limit() -> u64 {
    11
}

fn default_max_page_limit() -> u64 {
    100
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            schemes_default_limit: default_schemes_limit(),
            categories_default_limit: default_categories_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra filter directives, e.g. `schemehub_cache::listener=debug`
    #[serde(default)]
    pub directives: Vec<String>,
    /// Include the event target in formatted output
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directives: Vec::new(),
            with_target: default_with_target(),
        }
    }
}

pub mod loader {
    use super::CacheSettings;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "schemehub.toml";

    pub fn load_settings(path: Option<&str>) -> Result<CacheSettings, String> {
        load_settings_with_prefix(path, "SCHEMEHUB")
    }

    /// Like [`load_settings`] but reads overrides from `{prefix}__SECTION__KEY`.
    pub fn load_settings_with_prefix(
        path: Option<&str>,
        env_prefix: &str,
    ) -> Result<CacheSettings, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
