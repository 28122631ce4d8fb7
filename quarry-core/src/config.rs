//! Configuration types
//!
//! Batch sizes and concurrency windows are tunables. Different call sites
//! historically used very different values with no documented rationale, so
//! nothing here is load-bearing: defaults are merely sensible starting
//! points, overridable per data class.

use crate::error::ConfigError;
use crate::DataClass;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// RESOLVER
// ============================================================================

/// Batching and concurrency tunables for the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Maximum keys in one bulk request (the remote's payload cap).
    pub max_batch_size: usize,
    /// Concurrent bulk requests in flight.
    pub bulk_window: usize,
    /// Concurrent single-key fallback requests in flight.
    pub fallback_window: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            bulk_window: 20,
            fallback_window: 10,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_bulk_window(mut self, window: usize) -> Self {
        self.bulk_window = window;
        self
    }

    pub fn with_fallback_window(mut self, window: usize) -> Self {
        self.fallback_window = window;
        self
    }

    /// Apply a data class's overrides on top of these defaults.
    ///
    /// The result always validates: a class may shrink batches but never
    /// grow them past the service-wide size (which is also the client's
    /// bulk limit), and zero overrides become 1.
    pub fn for_class(&self, class: &DataClass) -> Self {
        let ceiling = self.max_batch_size.max(1);
        Self {
            max_batch_size: class
                .max_batch_size()
                .unwrap_or(ceiling)
                .clamp(1, ceiling),
            bulk_window: class.bulk_window().unwrap_or(self.bulk_window).max(1),
            fallback_window: class
                .fallback_window()
                .unwrap_or(self.fallback_window)
                .max(1),
        }
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `QUARRY_MAX_BATCH_SIZE`: keys per bulk request (default: 1000)
    /// - `QUARRY_BULK_WINDOW`: concurrent bulk requests (default: 20)
    /// - `QUARRY_FALLBACK_WINDOW`: concurrent single-key requests (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            max_batch_size: parse_var(&lookup, "QUARRY_MAX_BATCH_SIZE")
                .unwrap_or(defaults.max_batch_size),
            bulk_window: parse_var(&lookup, "QUARRY_BULK_WINDOW").unwrap_or(defaults.bulk_window),
            fallback_window: parse_var(&lookup, "QUARRY_FALLBACK_WINDOW")
                .unwrap_or(defaults.fallback_window),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_batch_size > 0
    /// - bulk_window > 0
    /// - fallback_window > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("max_batch_size", self.max_batch_size)?;
        positive("bulk_window", self.bulk_window)?;
        positive("fallback_window", self.fallback_window)?;
        Ok(())
    }
}

// ============================================================================
// REMOTE
// ============================================================================

/// Connection settings for the remote game-data API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL every endpoint path is joined onto.
    pub base_url: String,
    /// Per-request deadline applied by the HTTP transport.
    #[serde(default = "RemoteConfig::default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "RemoteConfig::default_user_agent")]
    pub user_agent: String,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: Self::default_timeout_ms(),
            user_agent: Self::default_user_agent(),
        }
    }

    fn default_timeout_ms() -> u64 {
        10_000
    }

    fn default_user_agent() -> String {
        format!("quarry/{}", env!("CARGO_PKG_VERSION"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `QUARRY_BASE_URL`: required
    /// - `QUARRY_REQUEST_TIMEOUT_MS`: per-request deadline (default: 10000)
    /// - `QUARRY_USER_AGENT`: User-Agent header (default: `quarry/<version>`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("QUARRY_BASE_URL").ok_or_else(|| ConfigError::MissingRequired {
            field: "QUARRY_BASE_URL".to_string(),
        })?;

        let config = Self {
            base_url,
            request_timeout_ms: parse_var(&lookup, "QUARRY_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(Self::default_timeout_ms),
            user_agent: lookup("QUARRY_USER_AGENT").unwrap_or_else(Self::default_user_agent),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_url".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
                reason: "base_url must be an http(s) URL".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "request_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Which cache tiers to build and where they live.
///
/// The memory tier always exists; file and LMDB tiers are enabled by giving
/// them a path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Entry cap for the in-process tier (0 = unbounded).
    pub memory_max_entries: usize,
    /// Directory for the JSON file tier.
    pub file_dir: Option<PathBuf>,
    /// Directory for the LMDB tier.
    pub lmdb_path: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub lmdb_max_size_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 50_000,
            file_dir: None,
            lmdb_path: None,
            lmdb_max_size_mb: 256,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lmdb_path.is_some() {
            positive("lmdb_max_size_mb", self.lmdb_max_size_mb)?;
        }
        Ok(())
    }
}

// ============================================================================
// TOP LEVEL
// ============================================================================

/// Full engine configuration, typically loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarryConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl QuarryConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: QuarryConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolver.validate()?;
        self.remote.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

fn positive(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: format!("{} must be greater than 0", field),
        });
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(name).and_then(|s| s.trim().parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================
