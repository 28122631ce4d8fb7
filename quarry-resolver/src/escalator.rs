//! Fallback escalation from bulk calls to single-key calls.
//!
//! Every batch gets exactly one bulk call. If that call fails for any
//! reason (transport, non-2xx status, undecodable or invalid payload) the
//! whole batch is abandoned and each of its keys is retried on its own.
//! Successful batches are never retried, so one bad batch cannot cost the
//! others anything.
//!
//! Bulk calls run under the bulk window. A failed batch re-enqueues its keys
//! at once; their single-key calls share one fallback window across all
//! batches and do not wait for slower bulk calls to finish.
//!
//! Fetched records are written to the cache chain as each call completes,
//! so concurrent resolutions leave the most recently fetched record behind.

use std::collections::BTreeSet;

use quarry_core::{Batch, DataClass, Key, Record, RemoteError, ResolverConfig};
use quarry_remote::RemoteResolve;
use quarry_storage::TierChain;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::scheduler::run_bounded;

/// Everything escalation learned about a set of batches.
#[derive(Debug, Clone, Default)]
pub struct EscalationOutcome {
    /// Fetched records in completion order.
    pub resolved: Vec<(Key, Record)>,
    /// Keys the remote answered for without a record (left out of a
    /// successful bulk response, or not found by a single-key call).
    pub omitted: BTreeSet<Key>,
    /// Keys whose single-key call failed.
    pub failed: BTreeSet<Key>,
    /// Keys never dispatched because the call was cancelled.
    pub cancelled: BTreeSet<Key>,
    pub bulk_calls: usize,
    pub bulk_failures: usize,
    pub bulk_resolved: usize,
    pub fallback_calls: usize,
    pub fallback_failures: usize,
    pub fallback_resolved: usize,
}

impl EscalationOutcome {
    pub fn calls_issued(&self) -> usize {
        self.bulk_calls + self.fallback_calls
    }

    pub fn calls_succeeded(&self) -> usize {
        self.calls_issued() - self.bulk_failures - self.fallback_failures
    }

    /// Keys that end up as placeholders.
    pub fn unresolved(&self) -> impl Iterator<Item = Key> + '_ {
        self.omitted
            .iter()
            .chain(self.failed.iter())
            .chain(self.cancelled.iter())
            .copied()
    }

    fn absorb(&mut self, part: EscalationOutcome) {
        self.resolved.extend(part.resolved);
        self.omitted.extend(part.omitted);
        self.failed.extend(part.failed);
        self.cancelled.extend(part.cancelled);
        self.bulk_calls += part.bulk_calls;
        self.bulk_failures += part.bulk_failures;
        self.bulk_resolved += part.bulk_resolved;
        self.fallback_calls += part.fallback_calls;
        self.fallback_failures += part.fallback_failures;
        self.fallback_resolved += part.fallback_resolved;
    }

    fn record_single(
        &mut self,
        key: Key,
        result: Result<Option<Record>, RemoteError>,
        class: &DataClass,
    ) {
        self.fallback_calls += 1;
        match result {
            Ok(Some(record)) => {
                self.fallback_resolved += 1;
                self.resolved.push((key, record));
            }
            Ok(None) => {
                self.omitted.insert(key);
            }
            Err(e) => {
                self.fallback_failures += 1;
                self.failed.insert(key);
                debug!(class = class.name(), key, error = %e, "Single-key resolve failed");
            }
        }
    }
}

/// Resolve every batch, escalating failed ones key by key.
///
/// Records are stored in `cache` as soon as the call that fetched them
/// returns. Never fails: every key of every batch ends up in exactly one of
/// `resolved`, `omitted`, `failed` or `cancelled`.
pub async fn escalate(
    remote: &dyn RemoteResolve,
    class: &DataClass,
    batches: Vec<Batch>,
    config: &ResolverConfig,
    cache: &TierChain,
    cancel: &CancelToken,
) -> EscalationOutcome {
    let mut outcome = EscalationOutcome::default();
    if batches.is_empty() {
        return outcome;
    }

    let fallback_window = config.fallback_window.max(1);
    let permits = Semaphore::new(fallback_window);
    let permits = &permits;

    let bulk = run_bounded(batches, config.bulk_window, cancel, |batch| async move {
        let mut part = EscalationOutcome {
            bulk_calls: 1,
            ..Default::default()
        };
        match remote.resolve_bulk(class, batch.keys()).await {
            Ok(mut answered) => {
                let mut fetched = Vec::with_capacity(answered.len());
                for &key in batch.keys() {
                    match answered.remove(&key) {
                        Some(record) => fetched.push((key, record)),
                        None => {
                            part.omitted.insert(key);
                        }
                    }
                }
                cache.store(&fetched, class.ttl_class()).await;
                part.bulk_resolved = fetched.len();
                part.resolved = fetched;
            }
            Err(e) => {
                part.bulk_failures = 1;
                warn!(
                    class = class.name(),
                    batch_size = batch.len(),
                    error = %e,
                    "Bulk resolve failed, escalating batch to single-key calls"
                );
                let keys = batch.into_keys();
                let singles = run_bounded(keys, fallback_window, cancel, |key| async move {
                    let Ok(_permit) = permits.acquire().await else {
                        return (key, None);
                    };
                    if cancel.is_cancelled() {
                        return (key, None);
                    }
                    let result = resolve_one(remote, class, key, cache).await;
                    (key, Some(result))
                })
                .await;
                for (key, result) in singles.completed {
                    match result {
                        Some(result) => part.record_single(key, result, class),
                        None => {
                            part.cancelled.insert(key);
                        }
                    }
                }
                part.cancelled.extend(singles.skipped);
            }
        }
        part
    })
    .await;

    for part in bulk.completed {
        outcome.absorb(part);
    }
    for batch in bulk.skipped {
        outcome.cancelled.extend(batch.into_keys());
    }
    outcome
}

/// One single-key call; a found record is cached before returning.
async fn resolve_one(
    remote: &dyn RemoteResolve,
    class: &DataClass,
    key: Key,
    cache: &TierChain,
) -> Result<Option<Record>, RemoteError> {
    let result = remote.resolve_single(class, key).await;
    if let Ok(Some(record)) = &result {
        cache
            .store(&[(key, record.clone())], class.ttl_class())
            .await;
    }
    result
}
