//! The resolver service.
//!
//! One [`ResolverService`] is built at startup and shared by `Arc`. Every API
//! wrapper calls it with its own [`DataClass`]; the service takes care of
//! dedup, cache precedence, validity filtering, batching, escalation, the
//! merge and the cache write-back.
//!
//! # Guarantees
//!
//! - The returned map has exactly one entry per distinct input key.
//! - Keys served by a fresh cache entry never reach the network.
//! - Keys rejected by the [`KeyFilter`] never reach the network and resolve
//!   to placeholders.
//! - Placeholders are returned but never cached.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use quarry_core::{
    dedupe, partition, split, ConfigError, DataClass, Key, KeyFilter, QuarryConfig, QuarryResult,
    RangeFilter, Record, ResolveError, ResolverConfig,
};
use quarry_remote::{HttpTransport, RemoteClient, RemoteResolve};
use quarry_storage::{chain_from_config, TierChain};
use tracing::{debug, info, info_span, Instrument};

use crate::cancel::CancelToken;
use crate::escalator::{escalate, EscalationOutcome};

/// Counters describing how one resolution call was served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Distinct keys requested.
    pub requested: usize,
    pub cache_hits: usize,
    /// Keys rejected by the validity filter.
    pub unaddressable: usize,
    pub batches: usize,
    pub bulk_calls: usize,
    pub bulk_failures: usize,
    pub bulk_resolved: usize,
    pub fallback_calls: usize,
    pub fallback_resolved: usize,
    /// Placeholders in the result, whatever their cause.
    pub placeholders: usize,
    /// Keys never dispatched because of cancellation.
    pub cancelled: usize,
    /// Cache tiers that failed during lookup.
    pub tiers_failed: usize,
}

impl ResolveReport {
    /// Remote calls issued.
    pub fn network_calls(&self) -> usize {
        self.bulk_calls + self.fallback_calls
    }
}

/// Result of [`ResolverService::resolve_with`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub records: HashMap<Key, Record>,
    pub report: ResolveReport,
}

impl Resolution {
    pub fn into_records(self) -> HashMap<Key, Record> {
        self.records
    }

    /// Keys that resolved to placeholders, sorted.
    pub fn placeholder_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_placeholder())
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Batched, cached, concurrency-bounded entity resolution.
#[derive(Clone)]
pub struct ResolverService {
    chain: TierChain,
    remote: Arc<dyn RemoteResolve>,
    filter: Arc<dyn KeyFilter>,
    config: ResolverConfig,
}

impl std::fmt::Debug for ResolverService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverService")
            .field("chain", &self.chain)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResolverService {
    /// Create a service with the default [`RangeFilter`].
    pub fn new(
        chain: TierChain,
        remote: Arc<dyn RemoteResolve>,
        config: ResolverConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            chain,
            remote,
            filter: Arc::new(RangeFilter::default()),
            config,
        })
    }

    /// Build the full stack from configuration: tiers, HTTP transport and
    /// remote client.
    pub fn from_config(config: &QuarryConfig) -> QuarryResult<Self> {
        config.validate()?;
        let chain = chain_from_config(&config.cache)?;
        let transport = HttpTransport::new(&config.remote)?;
        let remote = RemoteClient::new(transport, config.remote.clone())
            .with_bulk_limit(config.resolver.max_batch_size);
        Ok(Self::new(chain, Arc::new(remote), config.resolver.clone())?)
    }

    /// Replace the validity filter.
    pub fn with_filter(mut self, filter: Arc<dyn KeyFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn chain(&self) -> &TierChain {
        &self.chain
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve keys to records. See [`resolve_with`](Self::resolve_with).
    pub async fn resolve(
        &self,
        keys: &[Key],
        class: &DataClass,
    ) -> QuarryResult<HashMap<Key, Record>> {
        self.resolve_with(keys, class, &CancelToken::never())
            .await
            .map(Resolution::into_records)
    }

    /// Resolve a single key.
    pub async fn resolve_one(&self, key: Key, class: &DataClass) -> QuarryResult<Record> {
        let mut records = self.resolve(&[key], class).await?;
        records.remove(&key).ok_or_else(|| {
            ResolveError::CoverageViolation {
                missing: vec![key],
                extra: Vec::new(),
            }
            .into()
        })
    }

    /// Resolve keys to records, honouring `cancel`.
    ///
    /// Duplicates in `keys` are collapsed. Unanswered keys come back as
    /// placeholders; partial remote failure is not an error. The call fails
    /// only with [`ResolveError::Offline`] (calls were made, none succeeded
    /// and nothing came from cache) or with
    /// [`ResolveError::CoverageViolation`]. Fetched records are cached as
    /// each remote call completes.
    pub async fn resolve_with(
        &self,
        keys: &[Key],
        class: &DataClass,
        cancel: &CancelToken,
    ) -> QuarryResult<Resolution> {
        let requested = dedupe(keys.iter().copied());
        if requested.is_empty() {
            return Ok(Resolution::default());
        }

        let span = info_span!("resolve", class = class.name(), keys = requested.len());
        self.resolve_distinct(requested, class, cancel)
            .instrument(span)
            .await
    }

    async fn resolve_distinct(
        &self,
        requested: BTreeSet<Key>,
        class: &DataClass,
        cancel: &CancelToken,
    ) -> QuarryResult<Resolution> {
        let ttl_class = class.ttl_class();
        let config = self.config.for_class(class);
        let mut report = ResolveReport {
            requested: requested.len(),
            ..Default::default()
        };

        let lookup = self.chain.lookup(&requested, ttl_class).await;
        report.cache_hits = lookup.hits.len();
        report.tiers_failed = lookup.tiers_failed;

        let (addressable, unaddressable) = partition(self.filter.as_ref(), lookup.misses);
        report.unaddressable = unaddressable.len();

        let batches = split(addressable, config.max_batch_size)?;
        report.batches = batches.len();
        let outcome = escalate(
            self.remote.as_ref(),
            class,
            batches,
            &config,
            &self.chain,
            cancel,
        )
        .await;

        report.bulk_calls = outcome.bulk_calls;
        report.bulk_failures = outcome.bulk_failures;
        report.bulk_resolved = outcome.bulk_resolved;
        report.fallback_calls = outcome.fallback_calls;
        report.fallback_resolved = outcome.fallback_resolved;
        report.cancelled = outcome.cancelled.len();

        if outcome.calls_issued() > 0 && outcome.calls_succeeded() == 0 && report.cache_hits == 0 {
            return Err(ResolveError::Offline {
                attempts: outcome.calls_issued(),
            }
            .into());
        }

        let records = merge(lookup.hits, &outcome, unaddressable);
        check_coverage(&requested, &records)?;
        report.placeholders = records.values().filter(|r| r.is_placeholder()).count();

        debug!(
            cache_hits = report.cache_hits,
            unaddressable = report.unaddressable,
            bulk_calls = report.bulk_calls,
            bulk_failures = report.bulk_failures,
            fallback_calls = report.fallback_calls,
            placeholders = report.placeholders,
            cancelled = report.cancelled,
            "Resolution finished"
        );
        if report.bulk_failures > 0 {
            info!(
                bulk_failures = report.bulk_failures,
                fallback_resolved = report.fallback_resolved,
                "Resolution degraded to single-key calls"
            );
        }

        Ok(Resolution { records, report })
    }

    /// Eagerly drop expired entries of a data class from every tier.
    pub async fn purge_expired(&self, class: &DataClass) -> u64 {
        self.chain.purge_expired(class.ttl_class()).await
    }
}

/// Union of cache hits, fetched records and placeholders.
fn merge(
    cached: HashMap<Key, Record>,
    outcome: &EscalationOutcome,
    unaddressable: Vec<Key>,
) -> HashMap<Key, Record> {
    let mut records = cached;
    for (key, record) in &outcome.resolved {
        records.insert(*key, record.clone());
    }
    for key in outcome.unresolved().chain(unaddressable) {
        records.entry(key).or_insert_with(|| Record::placeholder(key));
    }
    records
}

fn check_coverage(
    requested: &BTreeSet<Key>,
    records: &HashMap<Key, Record>,
) -> Result<(), ResolveError> {
    let missing: Vec<Key> = requested
        .iter()
        .filter(|key| !records.contains_key(key))
        .copied()
        .collect();
    let mut extra: Vec<Key> = records
        .keys()
        .filter(|key| !requested.contains(key))
        .copied()
        .collect();
    if missing.is_empty() && extra.is_empty() {
        return Ok(());
    }
    extra.sort_unstable();
    Err(ResolveError::CoverageViolation { missing, extra })
}
