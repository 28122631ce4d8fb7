//! QUARRY Test Utilities
//!
//! Centralized test infrastructure for the QUARRY workspace:
//! - Scripted transport and mock remote with call logs and concurrency gauges
//! - A cache tier that always fails
//! - Proptest generators for keys and TTL classes
//! - Test fixtures for common scenarios
//! - Custom assertions for resolution results

// Re-export core types for convenience
pub use quarry_core::{
    CacheError, DataClass, Key, QuarryError, QuarryResult, Record, RemoteConfig, RemoteError,
    ResolveError, ResolverConfig, TtlClass,
};
pub use quarry_remote::{FetchRequest, Method, RemoteResolve, Transport};
pub use quarry_storage::{CacheStats, CacheTier, MemoryTier, TierChain};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// CONCURRENCY GAUGE
// ============================================================================

/// Counts calls currently in progress and remembers the peak.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlightGauge {
    /// Mark a call as started. The returned guard marks it finished on drop.
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

/// A [`Transport`] that plays the remote resolve API from an in-memory
/// catalog.
///
/// - `POST` bodies are parsed as key arrays and answered with the catalog
///   entries for those keys (unknown keys are simply left out).
/// - `GET .../<id>` is answered with one catalog entry, or 404.
///
/// Failures are scripted three ways: queued one-shot responses
/// ([`push_response`](Self::push_response)) take precedence over everything;
/// POSTs containing a poisoned key fail with 503; GETs for a poisoned key
/// fail with 503. [`set_offline`](Self::set_offline) fails every call.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    catalog: Mutex<HashMap<Key, Record>>,
    script: Mutex<VecDeque<Result<Vec<u8>, RemoteError>>>,
    failing_posts: Mutex<BTreeSet<Key>>,
    failing_gets: Mutex<BTreeSet<Key>>,
    offline: AtomicBool,
    latency: Option<Duration>,
    calls: Mutex<Vec<FetchRequest>>,
    gauge: InFlightGauge,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these records.
    pub fn with_records(self, records: impl IntoIterator<Item = (Key, Record)>) -> Self {
        self.lock_catalog().extend(records);
        self
    }

    /// Serve fixture records for these keys.
    pub fn with_keys(self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.with_records(keys.into_iter().map(|key| (key, fixtures::record(key))))
    }

    /// Delay every call, so concurrent calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every POST whose body contains one of these keys.
    pub fn fail_posts_containing(self, keys: impl IntoIterator<Item = Key>) -> Self {
        lock(&self.failing_posts).extend(keys);
        self
    }

    /// Fail every single-key GET for one of these keys.
    pub fn fail_gets_for(self, keys: impl IntoIterator<Item = Key>) -> Self {
        lock(&self.failing_gets).extend(keys);
        self
    }

    /// Queue a one-shot response for the next call.
    pub fn push_response(&self, response: Result<Vec<u8>, RemoteError>) {
        lock(&self.script).push_back(response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Key arrays of every POST, in call order.
    pub fn post_bodies(&self) -> Vec<Vec<Key>> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == Method::Post)
            .filter_map(|call| call.body)
            .filter_map(|body| serde_json::from_slice(&body).ok())
            .collect()
    }

    /// Ids of every GET, in call order.
    pub fn get_keys(&self) -> Vec<Key> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == Method::Get)
            .filter_map(|call| id_from_url(&call.url))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.gauge.max()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn lock_catalog(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Record>> {
        lock(&self.catalog)
    }

    fn answer(&self, request: &FetchRequest) -> Result<Vec<u8>, RemoteError> {
        if let Some(scripted) = lock(&self.script).pop_front() {
            return scripted;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            });
        }

        match request.method {
            Method::Post => {
                let keys: Vec<Key> = request
                    .body
                    .as_deref()
                    .and_then(|body| serde_json::from_slice(body).ok())
                    .ok_or_else(|| status(&request.url, 400, "body is not a key array"))?;
                if keys.iter().any(|key| lock(&self.failing_posts).contains(key)) {
                    return Err(status(&request.url, 503, "service unavailable"));
                }
                let catalog = self.lock_catalog();
                let answer: Vec<serde_json::Value> = keys
                    .iter()
                    .filter_map(|key| catalog.get(key).map(|record| wire(*key, record)))
                    .collect();
                Ok(serde_json::Value::Array(answer).to_string().into_bytes())
            }
            Method::Get => {
                let key = id_from_url(&request.url)
                    .ok_or_else(|| status(&request.url, 400, "no id in path"))?;
                if lock(&self.failing_gets).contains(&key) {
                    return Err(status(&request.url, 503, "service unavailable"));
                }
                match self.lock_catalog().get(&key) {
                    Some(record) => Ok(wire(key, record).to_string().into_bytes()),
                    None => Err(status(&request.url, 404, "not found")),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, RemoteError> {
        let _guard = self.gauge.enter();
        lock(&self.calls).push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(&request)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn status(url: &str, code: u16, message: &str) -> RemoteError {
    RemoteError::Status {
        url: url.to_string(),
        status: code,
        message: message.to_string(),
    }
}

fn wire(key: Key, record: &Record) -> serde_json::Value {
    serde_json::json!({ "id": key, "name": record.name, "category": record.category })
}

fn id_from_url(url: &str) -> Option<Key> {
    url.rsplit('/').next().and_then(|segment| segment.parse().ok())
}

// ============================================================================
// MOCK REMOTE
// ============================================================================

/// A [`RemoteResolve`] double working at the record level, for tests that do
/// not care about the wire format.
#[derive(Debug, Default)]
pub struct MockRemote {
    catalog: HashMap<Key, Record>,
    failing_bulk: BTreeSet<Key>,
    failing_single: BTreeSet<Key>,
    offline: AtomicBool,
    latency: Option<Duration>,
    bulk_calls: Mutex<Vec<Vec<Key>>>,
    single_calls: Mutex<Vec<Key>>,
    gauge: InFlightGauge,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for these keys with fixture records.
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.catalog
            .extend(keys.into_iter().map(|key| (key, fixtures::record(key))));
        self
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = (Key, Record)>) -> Self {
        self.catalog.extend(records);
        self
    }

    /// Fail every bulk call whose batch contains one of these keys.
    pub fn fail_bulk_containing(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.failing_bulk.extend(keys);
        self
    }

    /// Fail single-key calls for these keys.
    pub fn fail_single(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.failing_single.extend(keys);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Batches passed to `resolve_bulk`, in call order.
    pub fn bulk_calls(&self) -> Vec<Vec<Key>> {
        lock(&self.bulk_calls).clone()
    }

    /// Keys passed to `resolve_single`, in call order.
    pub fn single_calls(&self) -> Vec<Key> {
        lock(&self.single_calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.bulk_calls).len() + lock(&self.single_calls).len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.gauge.max()
    }

    pub fn clear_calls(&self) {
        lock(&self.bulk_calls).clear();
        lock(&self.single_calls).clear();
    }

    fn offline_error(&self, class: &DataClass) -> Option<RemoteError> {
        self.offline.load(Ordering::SeqCst).then(|| RemoteError::Transport {
            url: class.endpoint().to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

#[async_trait]
impl RemoteResolve for MockRemote {
    async fn resolve_bulk(
        &self,
        class: &DataClass,
        keys: &[Key],
    ) -> Result<HashMap<Key, Record>, RemoteError> {
        let _guard = self.gauge.enter();
        lock(&self.bulk_calls).push(keys.to_vec());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(e) = self.offline_error(class) {
            return Err(e);
        }
        if keys.iter().any(|key| self.failing_bulk.contains(key)) {
            return Err(status(class.endpoint(), 503, "service unavailable"));
        }
        Ok(keys
            .iter()
            .filter_map(|key| self.catalog.get(key).map(|record| (*key, record.clone())))
            .collect())
    }

    async fn resolve_single(
        &self,
        class: &DataClass,
        key: Key,
    ) -> Result<Option<Record>, RemoteError> {
        let _guard = self.gauge.enter();
        lock(&self.single_calls).push(key);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(e) = self.offline_error(class) {
            return Err(e);
        }
        if self.failing_single.contains(&key) {
            return Err(status(class.endpoint(), 503, "service unavailable"));
        }
        Ok(self.catalog.get(&key).cloned())
    }
}

// ============================================================================
// FAILING TIER
// ============================================================================

/// A cache tier whose every operation fails with an I/O error.
#[derive(Debug, Default)]
pub struct FailingTier {
    attempts: AtomicUsize,
}

impl FailingTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted against this tier.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> CacheError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        CacheError::io("failing", "simulated disk failure")
    }
}

#[async_trait]
impl CacheTier for FailingTier {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get(&self, _key: Key, _class: &TtlClass) -> Result<Option<Record>, CacheError> {
        Err(self.fail())
    }

    async fn put(&self, _key: Key, _record: &Record, _class: &TtlClass) -> Result<(), CacheError> {
        Err(self.fail())
    }

    async fn get_many(
        &self,
        _keys: &[Key],
        _class: &TtlClass,
    ) -> Result<quarry_storage::TierLookup, CacheError> {
        Err(self.fail())
    }

    async fn put_many(&self, _records: &[(Key, Record)], _class: &TtlClass) -> Result<(), CacheError> {
        Err(self.fail())
    }

    async fn purge_expired(&self, _class: &TtlClass) -> Result<u64, CacheError> {
        Err(self.fail())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            errors: self.attempts() as u64,
            ..Default::default()
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and TTL classes.

    use super::*;
    use proptest::prelude::*;

    /// A key the default validity filter accepts.
    pub fn arb_addressable_key() -> impl Strategy<Value = Key> {
        1..=(i32::MAX as Key)
    }

    /// Any key, including ones outside the remote's id space.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        prop_oneof![
            8 => arb_addressable_key(),
            1 => Just(0 as Key),
            1 => (i32::MAX as Key + 1)..=Key::MAX,
        ]
    }

    /// Key lists drawn from a small pool so duplicates are common.
    pub fn arb_key_list(max_len: usize) -> impl Strategy<Value = Vec<Key>> {
        prop::collection::vec(1..=(max_len as Key).max(1), 0..=max_len)
    }

    /// Key lists mixing duplicates and unaddressable keys.
    pub fn arb_mixed_key_list(max_len: usize) -> impl Strategy<Value = Vec<Key>> {
        prop::collection::vec(
            prop_oneof![
                6 => 1..=(max_len as Key).max(1),
                1 => Just(0 as Key),
                1 => Just(Key::MAX),
            ],
            0..=max_len,
        )
    }

    pub fn arb_ttl_class() -> impl Strategy<Value = TtlClass> {
        prop_oneof![
            Just(TtlClass::names()),
            Just(TtlClass::market()),
            Just(TtlClass::status()),
            (1u64..86_400).prop_map(|secs| TtlClass::new("custom", Duration::from_secs(secs))),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made records, data classes and tier chains.

    use super::*;

    /// The fixture record served for `key`.
    pub fn record(key: Key) -> Record {
        Record::new(format!("Entity {}", key), "test_entity")
    }

    pub fn records(keys: impl IntoIterator<Item = Key>) -> Vec<(Key, Record)> {
        keys.into_iter().map(|key| (key, record(key))).collect()
    }

    /// A data class resolved only through bulk POSTs.
    pub fn bulk_only_class() -> DataClass {
        DataClass::new("test", "test/resolve", TtlClass::names())
    }

    /// A data class with a `GET test/<id>` single-key endpoint.
    pub fn class_with_single_endpoint() -> DataClass {
        bulk_only_class().with_single_endpoint("test")
    }

    pub fn remote_config() -> RemoteConfig {
        RemoteConfig::new("https://api.test")
    }

    /// A one-tier memory chain, with a handle on the tier.
    pub fn memory_chain() -> (Arc<MemoryTier>, TierChain) {
        let tier = Arc::new(MemoryTier::new());
        let chain = TierChain::new(vec![tier.clone() as Arc<dyn CacheTier>]);
        (tier, chain)
    }

    /// A memory chain already holding fixture records for `keys`.
    pub async fn seeded_chain(
        keys: impl IntoIterator<Item = Key>,
        class: &DataClass,
    ) -> (Arc<MemoryTier>, TierChain) {
        let (tier, chain) = memory_chain();
        chain.store(&records(keys), class.ttl_class()).await;
        (tier, chain)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for resolution results.

    use super::*;

    /// Assert the result has exactly one entry per distinct input key.
    pub fn assert_covers(records: &HashMap<Key, Record>, keys: &[Key]) {
        let expected: BTreeSet<Key> = keys.iter().copied().collect();
        let actual: BTreeSet<Key> = records.keys().copied().collect();
        assert_eq!(actual, expected, "result domain must equal the distinct input");
    }

    /// Assert a record is the placeholder for `key`.
    pub fn assert_placeholder(record: &Record, key: Key) {
        assert!(record.is_placeholder(), "expected placeholder for {key}, got {record:?}");
        assert_eq!(record.name, key.to_string());
        assert_eq!(record.category, quarry_core::PLACEHOLDER_CATEGORY);
    }

    /// Assert a record is the fixture record for `key`.
    pub fn assert_fixture(record: &Record, key: Key) {
        assert!(!record.is_placeholder(), "expected a resolved record for {key}");
        assert_eq!(record.name, fixtures::record(key).name);
    }

    pub fn assert_offline<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        assert!(
            matches!(result, Err(QuarryError::Resolve(ResolveError::Offline { .. }))),
            "expected Offline, got {result:?}"
        );
    }
}
