//! Cache tier trait and statistics.
//!
//! This module defines the contract every cache tier implements. Tiers are
//! used as trait objects inside a [`TierChain`](super::TierChain), so the
//! trait is object-safe and keyed on the concrete [`Record`] type.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use quarry_core::{CacheError, Key, Record, TtlClass};

/// Result of querying one tier for many keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierLookup {
    /// Keys with a servable (fresh, non-placeholder) entry.
    pub hits: HashMap<Key, Record>,
    /// Keys with no entry, an expired entry, or a cached placeholder.
    pub misses: BTreeSet<Key>,
}

impl TierLookup {
    pub fn hit(&mut self, key: Key, record: Record) {
        self.hits.insert(key, record);
    }

    pub fn miss(&mut self, key: Key) {
        self.misses.insert(key);
    }
}

/// A key/value store with a freshness policy.
///
/// # Contract
///
/// - A miss is `Ok(None)` (or a key in [`TierLookup::misses`]), never an error.
/// - Errors mean the tier itself is unusable (disk unreadable, store
///   unavailable). Callers treat them as a full miss for that tier.
/// - Entries older than the caller's [`TtlClass`] window are misses. They may
///   be left in place; [`purge_expired`](Self::purge_expired) removes them
///   eagerly.
/// - Placeholder records are misses.
/// - All mutation goes through `put`/`put_many`; each tier serializes its own
///   writes.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Get a servable record.
    async fn get(&self, key: Key, class: &TtlClass) -> Result<Option<Record>, CacheError>;

    /// Store a record, replacing whatever was there.
    async fn put(&self, key: Key, record: &Record, class: &TtlClass) -> Result<(), CacheError>;

    /// Query many keys at once.
    async fn get_many(&self, keys: &[Key], class: &TtlClass) -> Result<TierLookup, CacheError> {
        let mut lookup = TierLookup::default();
        for &key in keys {
            match self.get(key, class).await? {
                Some(record) => lookup.hit(key, record),
                None => lookup.miss(key),
            }
        }
        Ok(lookup)
    }

    /// Store many records. Tiers with a natural batch write override this.
    async fn put_many(&self, records: &[(Key, Record)], class: &TtlClass) -> Result<(), CacheError> {
        for (key, record) in records {
            self.put(*key, record, class).await?;
        }
        Ok(())
    }

    /// Remove expired entries of a class, returning how many were removed.
    async fn purge_expired(&self, _class: &TtlClass) -> Result<u64, CacheError> {
        Ok(0)
    }

    /// Usage counters.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of records written.
    pub writes: u64,
    /// Number of I/O faults.
    pub errors: u64,
    /// Number of entries currently held (best effort).
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters shared by the tier implementations.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
}

impl TierCounters {
    pub(crate) fn record_lookup(&self, lookup: &TierLookup) {
        self.hits
            .fetch_add(lookup.hits.len() as u64, Ordering::Relaxed);
        self.misses
            .fetch_add(lookup.misses.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writes(&self, count: usize) {
        self.writes.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            entry_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
