//! QUARRY Core - Resolution Types
//!
//! Plain data structures shared by every QUARRY crate: keys, records, TTL
//! classes, cache entries and data-class descriptors, plus the two pure
//! pre-dispatch steps (validity filtering and batch splitting).
//! Nothing in this crate performs I/O.

pub mod batch;
pub mod config;
pub mod error;
pub mod filter;

pub use batch::{dedupe, split, Batch};
pub use config::{CacheConfig, QuarryConfig, RemoteConfig, ResolverConfig};
pub use error::{
    CacheError, ConfigError, QuarryError, QuarryResult, RemoteError, ResolveError,
};
pub use filter::{partition, AcceptAll, KeyFilter, RangeFilter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Opaque identifier of a remote entity.
///
/// Keys are non-negative and carry no meaning beyond identity; the remote
/// service decides what they refer to.
pub type Key = u64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Category given to every synthesized placeholder record.
pub const PLACEHOLDER_CATEGORY: &str = "unknown";

// ============================================================================
// RECORD
// ============================================================================

/// A resolved entity.
///
/// Records are immutable once created. A later fetch produces a new record
/// that replaces the old one at every cache tier; nothing is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub category: String,
    pub resolved_at: Timestamp,
    /// Set when the record was synthesized because the key could not be
    /// resolved. Placeholders are never written to cache tiers.
    #[serde(default)]
    pub placeholder: bool,
}

impl Record {
    /// Create a record resolved now.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            resolved_at: Utc::now(),
            placeholder: false,
        }
    }

    /// Override the resolution timestamp.
    pub fn with_resolved_at(mut self, resolved_at: Timestamp) -> Self {
        self.resolved_at = resolved_at;
        self
    }

    /// Synthesize the placeholder for a key nobody could resolve.
    pub fn placeholder(key: Key) -> Self {
        Self {
            name: key.to_string(),
            category: PLACEHOLDER_CATEGORY.to_string(),
            resolved_at: Utc::now(),
            placeholder: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

// ============================================================================
// TTL CLASSES
// ============================================================================

/// A named freshness policy.
///
/// Different data classes tolerate very different staleness: entity names
/// practically never change, market listings go stale within hours and
/// server status within minutes. The class name also namespaces cache keys,
/// so the same key cached under two classes never collides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtlClass {
    name: String,
    ttl: Duration,
}

impl TtlClass {
    /// Create a TTL class with an arbitrary window.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
        }
    }

    /// Entity names: near-permanent (30 days).
    pub fn names() -> Self {
        Self::new("names", Duration::from_secs(30 * 24 * 60 * 60))
    }

    /// Market data: hours (6 hours).
    pub fn market() -> Self {
        Self::new("market", Duration::from_secs(6 * 60 * 60))
    }

    /// Live status: minutes (5 minutes).
    pub fn status() -> Self {
        Self::new("status", Duration::from_secs(5 * 60))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether something stored at `stored_at` is expired at `now`.
    ///
    /// An entry is expired iff `now - stored_at > ttl`; an entry exactly
    /// `ttl` old is still fresh. Entries stored in the future (clock skew)
    /// are fresh. A window too large for chrono never expires.
    pub fn is_expired(&self, stored_at: Timestamp, now: Timestamp) -> bool {
        let age = now.signed_duration_since(stored_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A record as stored by a cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: Key,
    pub record: Record,
    pub stored_at: Timestamp,
    /// Name of the TTL class the entry was stored under.
    pub ttl_class: String,
}

impl CacheEntry {
    /// Create an entry stored now.
    pub fn new(key: Key, record: Record, ttl_class: &TtlClass) -> Self {
        Self::stored_at(key, record, ttl_class, Utc::now())
    }

    /// Create an entry with an explicit storage time.
    pub fn stored_at(key: Key, record: Record, ttl_class: &TtlClass, stored_at: Timestamp) -> Self {
        Self {
            key,
            record,
            stored_at,
            ttl_class: ttl_class.name().to_string(),
        }
    }

    /// Expiry is judged against the caller's class, so a policy change takes
    /// effect without rewriting stored entries.
    pub fn is_expired(&self, ttl_class: &TtlClass, now: Timestamp) -> bool {
        ttl_class.is_expired(self.stored_at, now)
    }

    /// Whether this entry may be served as a cache hit.
    pub fn is_servable(&self, ttl_class: &TtlClass, now: Timestamp) -> bool {
        !self.record.is_placeholder() && !self.is_expired(ttl_class, now)
    }

    /// How long ago the entry was stored.
    pub fn age(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// ============================================================================
// DATA CLASSES
// ============================================================================

/// Per-call-site descriptor for one kind of remote data.
///
/// Each API wrapper supplies only this: where the resolve endpoint lives,
/// which freshness policy applies, and optional overrides of the
/// service-wide batching and concurrency tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataClass {
    name: String,
    endpoint: String,
    single_endpoint: Option<String>,
    ttl_class: TtlClass,
    max_batch_size: Option<usize>,
    bulk_window: Option<usize>,
    fallback_window: Option<usize>,
}

impl DataClass {
    /// Create a data class resolved through `POST <base>/<endpoint>`.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, ttl_class: TtlClass) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            single_endpoint: None,
            ttl_class,
            max_batch_size: None,
            bulk_window: None,
            fallback_window: None,
        }
    }

    /// Entity names (`universe/names`), the most common call site.
    pub fn names() -> Self {
        Self::new("names", "universe/names", TtlClass::names())
    }

    /// Market type descriptors.
    pub fn market_types() -> Self {
        Self::new("market_types", "markets/types", TtlClass::market())
            .with_max_batch_size(100)
    }

    /// Server status entries, resolvable one at a time via `GET`.
    pub fn server_status() -> Self {
        Self::new("server_status", "status/resolve", TtlClass::status())
            .with_single_endpoint("status")
            .with_fallback_window(4)
    }

    /// Resolve single keys through `GET <base>/<path>/<id>` instead of a
    /// one-element bulk request.
    pub fn with_single_endpoint(mut self, path: impl Into<String>) -> Self {
        self.single_endpoint = Some(path.into());
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn with_bulk_window(mut self, window: usize) -> Self {
        self.bulk_window = Some(window);
        self
    }

    pub fn with_fallback_window(mut self, window: usize) -> Self {
        self.fallback_window = Some(window);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn single_endpoint(&self) -> Option<&str> {
        self.single_endpoint.as_deref()
    }

    pub fn ttl_class(&self) -> &TtlClass {
        &self.ttl_class
    }

    pub fn max_batch_size(&self) -> Option<usize> {
        self.max_batch_size
    }

    pub fn bulk_window(&self) -> Option<usize> {
        self.bulk_window
    }

    pub fn fallback_window(&self) -> Option<usize> {
        self.fallback_window
    }
}

// =============================================================================
// TESTS
// =============================================================================
