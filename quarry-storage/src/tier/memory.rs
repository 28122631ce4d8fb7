//! In-process cache tier.
//!
//! The fastest tier and normally first in the chain. Entries live in a map
//! per TTL class behind a single `RwLock`, which serializes mutation for the
//! whole tier. An optional cap evicts the oldest entries first.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use quarry_core::{CacheEntry, CacheError, Key, Record, TtlClass};

use super::traits::{CacheStats, CacheTier, TierCounters, TierLookup};

const TIER_NAME: &str = "memory";

type ClassMap = HashMap<String, HashMap<Key, CacheEntry>>;

/// In-memory cache tier.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<ClassMap>,
    /// 0 = unbounded.
    max_entries: usize,
    counters: TierCounters,
}

impl MemoryTier {
    /// Create an unbounded memory tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory tier holding at most `max_entries` entries across all
    /// classes. Zero means unbounded.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|classes| classes.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry verbatim, keeping its `stored_at`.
    pub fn insert_entry(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut classes = self.write_guard()?;
        classes
            .entry(entry.ttl_class.clone())
            .or_default()
            .insert(entry.key, entry);
        self.evict_over_capacity(&mut classes);
        self.counters.record_writes(1);
        Ok(())
    }

    fn write_guard(&self) -> Result<std::sync::RwLockWriteGuard<'_, ClassMap>, CacheError> {
        self.entries.write().map_err(|_| {
            self.counters.record_error();
            CacheError::LockPoisoned {
                tier: TIER_NAME.to_string(),
            }
        })
    }

    fn read_guard(&self) -> Result<std::sync::RwLockReadGuard<'_, ClassMap>, CacheError> {
        self.entries.read().map_err(|_| {
            self.counters.record_error();
            CacheError::LockPoisoned {
                tier: TIER_NAME.to_string(),
            }
        })
    }

    /// Drop the oldest entries until the tier is back under its cap.
    fn evict_over_capacity(&self, classes: &mut ClassMap) {
        if self.max_entries == 0 {
            return;
        }
        let total: usize = classes.values().map(HashMap::len).sum();
        if total <= self.max_entries {
            return;
        }

        let mut by_age: Vec<(chrono::DateTime<Utc>, String, Key)> = classes
            .iter()
            .flat_map(|(class, entries)| {
                entries
                    .values()
                    .map(move |entry| (entry.stored_at, class.clone(), entry.key))
            })
            .collect();
        by_age.sort();

        let excess = total - self.max_entries;
        for (_, class, key) in by_age.into_iter().take(excess) {
            if let Some(entries) = classes.get_mut(&class) {
                entries.remove(&key);
            }
        }
        classes.retain(|_, entries| !entries.is_empty());
        self.counters.record_evictions(excess);
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn get(&self, key: Key, class: &TtlClass) -> Result<Option<Record>, CacheError> {
        let classes = self.read_guard()?;
        let now = Utc::now();
        let found = classes
            .get(class.name())
            .and_then(|entries| entries.get(&key))
            .filter(|entry| entry.is_servable(class, now))
            .map(|entry| entry.record.clone());

        match found {
            Some(_) => self.counters.record_hit(),
            None => self.counters.record_miss(),
        }
        Ok(found)
    }

    async fn put(&self, key: Key, record: &Record, class: &TtlClass) -> Result<(), CacheError> {
        self.insert_entry(CacheEntry::new(key, record.clone(), class))
    }

    async fn get_many(&self, keys: &[Key], class: &TtlClass) -> Result<TierLookup, CacheError> {
        let classes = self.read_guard()?;
        let now = Utc::now();
        let entries = classes.get(class.name());

        let mut lookup = TierLookup::default();
        for &key in keys {
            match entries
                .and_then(|entries| entries.get(&key))
                .filter(|entry| entry.is_servable(class, now))
            {
                Some(entry) => lookup.hit(key, entry.record.clone()),
                None => lookup.miss(key),
            }
        }
        self.counters.record_lookup(&lookup);
        Ok(lookup)
    }

    async fn put_many(&self, records: &[(Key, Record)], class: &TtlClass) -> Result<(), CacheError> {
        let mut classes = self.write_guard()?;
        let stored_at = Utc::now();
        let entries = classes.entry(class.name().to_string()).or_default();
        for (key, record) in records {
            entries.insert(
                *key,
                CacheEntry::stored_at(*key, record.clone(), class, stored_at),
            );
        }
        self.evict_over_capacity(&mut classes);
        self.counters.record_writes(records.len());
        Ok(())
    }

    async fn purge_expired(&self, class: &TtlClass) -> Result<u64, CacheError> {
        let mut classes = self.write_guard()?;
        let now = Utc::now();
        let Some(entries) = classes.get_mut(class.name()) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(class, now));
        Ok((before - entries.len()) as u64)
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn short_class() -> TtlClass {
        TtlClass::new("short", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let tier = MemoryTier::new();
        let class = TtlClass::names();
        let record = Record::new("Jita", "solar_system");

        tier.put(30000142, &record, &class).await.unwrap();
        let cached = tier.get(30000142, &class).await.unwrap();
        assert_eq!(cached, Some(record));
    }

    #[tokio::test]
    async fn test_classes_are_isolated() {
        let tier = MemoryTier::new();
        tier.put(1, &Record::new("a", "b"), &TtlClass::names())
            .await
            .unwrap();

        assert!(tier.get(1, &TtlClass::market()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_but_kept() {
        let tier = MemoryTier::new();
        let class = short_class();
        let stale = CacheEntry::stored_at(
            5,
            Record::new("old", "x"),
            &class,
            Utc::now() - chrono::Duration::seconds(120),
        );
        tier.insert_entry(stale).unwrap();

        assert!(tier.get(5, &class).await.unwrap().is_none());
        assert_eq!(tier.len(), 1, "expiry is lazy");

        let purged = tier.purge_expired(&class).await.unwrap();
        assert_eq!(purged, 1);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_cached_placeholder_is_miss() {
        let tier = MemoryTier::new();
        let class = TtlClass::names();
        tier.put(9, &Record::placeholder(9), &class).await.unwrap();
        assert!(tier.get(9, &class).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_partitions() {
        let tier = MemoryTier::new();
        let class = TtlClass::names();
        tier.put_many(
            &[(1, Record::new("one", "c")), (3, Record::new("three", "c"))],
            &class,
        )
        .await
        .unwrap();

        let lookup = tier.get_many(&[1, 2, 3, 4], &class).await.unwrap();
        assert_eq!(lookup.hits.len(), 2);
        assert_eq!(lookup.misses.iter().copied().collect::<Vec<_>>(), vec![2, 4]);

        let stats = tier.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.writes, 2);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_record() {
        let tier = MemoryTier::new();
        let class = TtlClass::names();
        tier.put(1, &Record::new("old", "c"), &class).await.unwrap();
        tier.put(1, &Record::new("new", "c"), &class).await.unwrap();

        assert_eq!(tier.get(1, &class).await.unwrap().unwrap().name, "new");
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let tier = MemoryTier::with_capacity(2);
        let class = TtlClass::names();
        let now = Utc::now();
        for (offset, key) in [(30, 1u64), (20, 2), (10, 3)] {
            tier.insert_entry(CacheEntry::stored_at(
                key,
                Record::new(key.to_string(), "c"),
                &class,
                now - chrono::Duration::seconds(offset),
            ))
            .unwrap();
        }

        assert_eq!(tier.len(), 2);
        assert!(tier.get(1, &class).await.unwrap().is_none());
        assert!(tier.get(3, &class).await.unwrap().is_some());
        assert_eq!(tier.stats().evictions, 1);
    }
}
