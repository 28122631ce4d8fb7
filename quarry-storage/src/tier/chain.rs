//! Ordered composition of cache tiers.
//!
//! The chain consults tiers in precedence order, passing only the keys a tier
//! missed on to the next one. Hits found further down are written back into
//! every higher tier that missed them, so the next lookup stops earlier.
//! Tier faults never reach the caller: a failing tier counts as a full miss
//! and the chain carries on with the rest.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quarry_core::{Key, Record, TtlClass};
use tracing::{debug, warn};

use super::traits::{CacheStats, CacheTier};

/// Result of a chain lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainLookup {
    /// Keys served from some tier.
    pub hits: HashMap<Key, Record>,
    /// Keys no tier could serve.
    pub misses: BTreeSet<Key>,
    /// Tiers that answered without error.
    pub tiers_reachable: usize,
    /// Tiers that failed and were skipped.
    pub tiers_failed: usize,
}

/// Cache tiers in precedence order (fastest first).
#[derive(Clone, Default)]
pub struct TierChain {
    tiers: Vec<Arc<dyn CacheTier>>,
    faults: Arc<AtomicU64>,
}

impl std::fmt::Debug for TierChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierChain")
            .field(
                "tiers",
                &self.tiers.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .field("faults", &self.faults.load(Ordering::Relaxed))
            .finish()
    }
}

impl TierChain {
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>) -> Self {
        Self {
            tiers,
            faults: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A chain with no tiers; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a tier at the lowest precedence.
    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.tiers
    }

    /// Tier faults observed by the chain (lookups, backfills, stores).
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Look up keys tier by tier.
    pub async fn lookup(&self, keys: &BTreeSet<Key>, class: &TtlClass) -> ChainLookup {
        let mut result = ChainLookup {
            misses: keys.clone(),
            ..Default::default()
        };
        // Tiers that answered and missed something, paired with what they missed.
        let mut missed_by: Vec<(usize, BTreeSet<Key>)> = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            if result.misses.is_empty() {
                break;
            }
            let pending: Vec<Key> = result.misses.iter().copied().collect();
            match tier.get_many(&pending, class).await {
                Ok(lookup) => {
                    result.tiers_reachable += 1;
                    if !lookup.hits.is_empty() {
                        debug!(
                            tier = tier.name(),
                            class = class.name(),
                            hits = lookup.hits.len(),
                            "Tier hits"
                        );
                        self.backfill(&missed_by, &lookup.hits, class).await;
                    }
                    for (key, record) in lookup.hits {
                        result.misses.remove(&key);
                        result.hits.insert(key, record);
                    }
                    if !result.misses.is_empty() {
                        missed_by.push((index, result.misses.clone()));
                    }
                }
                Err(e) => {
                    result.tiers_failed += 1;
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        tier = tier.name(),
                        class = class.name(),
                        error = %e,
                        "Cache tier lookup failed, treating as miss"
                    );
                }
            }
        }

        result
    }

    /// Write hits found at a lower tier into the higher tiers that missed them.
    async fn backfill(
        &self,
        missed_by: &[(usize, BTreeSet<Key>)],
        hits: &HashMap<Key, Record>,
        class: &TtlClass,
    ) {
        for (index, missed) in missed_by {
            let mut records: Vec<(Key, Record)> = hits
                .iter()
                .filter(|(key, _)| missed.contains(key))
                .map(|(key, record)| (*key, record.clone()))
                .collect();
            if records.is_empty() {
                continue;
            }
            records.sort_by_key(|(key, _)| *key);

            let tier = &self.tiers[*index];
            if let Err(e) = tier.put_many(&records, class).await {
                self.faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tier = tier.name(),
                    class = class.name(),
                    error = %e,
                    "Cache backfill failed"
                );
            }
        }
    }

    /// Write records to every tier. Placeholders are skipped.
    ///
    /// Returns the number of tiers that accepted the write.
    pub async fn store(&self, records: &[(Key, Record)], class: &TtlClass) -> usize {
        let records: Vec<(Key, Record)> = records
            .iter()
            .filter(|(_, record)| !record.is_placeholder())
            .cloned()
            .collect();
        if records.is_empty() {
            return 0;
        }

        let mut stored = 0;
        for tier in &self.tiers {
            match tier.put_many(&records, class).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        tier = tier.name(),
                        class = class.name(),
                        records = records.len(),
                        error = %e,
                        "Cache store failed"
                    );
                }
            }
        }
        stored
    }

    /// Purge expired entries of a class from every tier.
    pub async fn purge_expired(&self, class: &TtlClass) -> u64 {
        let mut purged = 0;
        for tier in &self.tiers {
            match tier.purge_expired(class).await {
                Ok(count) => purged += count,
                Err(e) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        tier = tier.name(),
                        class = class.name(),
                        error = %e,
                        "Cache purge failed"
                    );
                }
            }
        }
        purged
    }

    /// Per-tier statistics in precedence order.
    pub fn stats(&self) -> Vec<(String, CacheStats)> {
        self.tiers
            .iter()
            .map(|tier| (tier.name().to_string(), tier.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::MemoryTier;
    use async_trait::async_trait;
    use quarry_core::CacheError;

    struct BrokenTier;

    #[async_trait]
    impl CacheTier for BrokenTier {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _key: Key, _class: &TtlClass) -> Result<Option<Record>, CacheError> {
            Err(CacheError::io("broken", "disk gone"))
        }

        async fn put(&self, _key: Key, _r: &Record, _class: &TtlClass) -> Result<(), CacheError> {
            Err(CacheError::io("broken", "disk gone"))
        }

        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    fn keys(values: &[Key]) -> BTreeSet<Key> {
        values.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_empty_chain_misses_everything() {
        let chain = TierChain::empty();
        let lookup = chain.lookup(&keys(&[1, 2]), &TtlClass::names()).await;
        assert!(lookup.hits.is_empty());
        assert_eq!(lookup.misses, keys(&[1, 2]));
        assert_eq!(lookup.tiers_reachable, 0);
    }

    #[tokio::test]
    async fn test_precedence_and_backfill() {
        let class = TtlClass::names();
        let upper = Arc::new(MemoryTier::new());
        let lower = Arc::new(MemoryTier::new());
        upper.put(1, &Record::new("upper", "c"), &class).await.unwrap();
        lower.put(1, &Record::new("lower", "c"), &class).await.unwrap();
        lower.put(2, &Record::new("two", "c"), &class).await.unwrap();

        let chain = TierChain::new(vec![upper.clone(), lower.clone()]);
        let lookup = chain.lookup(&keys(&[1, 2, 3]), &class).await;

        assert_eq!(lookup.hits[&1].name, "upper");
        assert_eq!(lookup.hits[&2].name, "two");
        assert_eq!(lookup.misses, keys(&[3]));
        assert_eq!(lookup.tiers_reachable, 2);

        let backfilled = upper.get(2, &class).await.unwrap();
        assert_eq!(backfilled.map(|r| r.name), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_failing_tier_is_a_miss() {
        let class = TtlClass::names();
        let lower = Arc::new(MemoryTier::new());
        lower.put(5, &Record::new("five", "c"), &class).await.unwrap();

        let chain = TierChain::new(vec![Arc::new(BrokenTier), lower]);
        let lookup = chain.lookup(&keys(&[5, 6]), &class).await;

        assert_eq!(lookup.hits.len(), 1);
        assert_eq!(lookup.tiers_failed, 1);
        assert_eq!(lookup.tiers_reachable, 1);
        // Backfill into the broken tier is never attempted; only the lookup faulted.
        assert_eq!(chain.fault_count(), 1);
    }

    #[tokio::test]
    async fn test_store_skips_placeholders_and_survives_faults() {
        let class = TtlClass::names();
        let memory = Arc::new(MemoryTier::new());
        let chain = TierChain::new(vec![Arc::new(BrokenTier), memory.clone()]);

        let stored = chain
            .store(
                &[(1, Record::new("one", "c")), (2, Record::placeholder(2))],
                &class,
            )
            .await;

        assert_eq!(stored, 1);
        assert_eq!(memory.len(), 1);
        assert!(memory.get(2, &class).await.unwrap().is_none());
        assert_eq!(chain.fault_count(), 1);
    }

    #[tokio::test]
    async fn test_stats_in_precedence_order() {
        let chain = TierChain::empty()
            .with_tier(Arc::new(MemoryTier::new()))
            .with_tier(Arc::new(BrokenTier));
        let names: Vec<String> = chain.stats().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["memory", "broken"]);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::tier::MemoryTier;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Hits and misses partition the requested keys.
        #[test]
        fn prop_lookup_partitions_keys(
            requested in proptest::collection::btree_set(0u64..200, 0..40),
            upper_cached in proptest::collection::btree_set(0u64..200, 0..40),
            lower_cached in proptest::collection::btree_set(0u64..200, 0..40),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let lookup = runtime.block_on(async {
                let class = TtlClass::names();
                let upper = Arc::new(MemoryTier::new());
                let lower = Arc::new(MemoryTier::new());
                for key in &upper_cached {
                    upper.put(*key, &Record::new("u", "c"), &class).await.unwrap();
                }
                for key in &lower_cached {
                    lower.put(*key, &Record::new("l", "c"), &class).await.unwrap();
                }
                TierChain::new(vec![upper, lower]).lookup(&requested, &class).await
            });

            let mut covered: BTreeSet<Key> = lookup.hits.keys().copied().collect();
            prop_assert!(covered.is_disjoint(&lookup.misses));
            covered.extend(lookup.misses.iter().copied());
            prop_assert_eq!(covered, requested.clone());

            for key in &requested {
                let expected = upper_cached.contains(key) || lower_cached.contains(key);
                prop_assert_eq!(lookup.hits.contains_key(key), expected);
            }
        }
    }
}
