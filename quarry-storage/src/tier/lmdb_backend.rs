//! LMDB-backed persistent cache tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the persistent structured
//! store behind the faster tiers. Logically it is a table with columns
//! `(key, payload, stored_at, ttl_class)`:
//!
//! - key and ttl_class are packed into a [`ClassScopedKey`]
//! - the value is `[stored_at: 8 bytes millis LE][payload: JSON record]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The tier uses:
//! - Read transactions for `get` and `get_many`
//! - Write transactions for `put`, `put_many`, purges and invalidation
//! - Statistics are tracked with atomic counters

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use quarry_core::{CacheEntry, CacheError, Key, Record, TtlClass};
use tracing::warn;

use super::class_key::ClassScopedKey;
use super::traits::{CacheStats, CacheTier, TierCounters, TierLookup};

const TIER_NAME: &str = "lmdb";

/// Error type for LMDB tier setup and operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(reason) => CacheError::Serialization {
                tier: TIER_NAME.to_string(),
                reason,
            },
            LmdbCacheError::Io(err) => CacheError::io(TIER_NAME, err),
            other => CacheError::TransactionFailed {
                tier: TIER_NAME.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Encode a stored value: `[stored_at millis LE][json record]`.
fn encode_value(record: &Record, stored_at: DateTime<Utc>) -> Result<Vec<u8>, LmdbCacheError> {
    let payload =
        serde_json::to_vec(record).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&stored_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a stored value into its record and storage time.
fn decode_value(bytes: &[u8]) -> Result<(Record, DateTime<Utc>), LmdbCacheError> {
    if bytes.len() < 8 {
        return Err(LmdbCacheError::Serialization(
            "value shorter than timestamp header".into(),
        ));
    }
    let timestamp_bytes: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| LmdbCacheError::Serialization("Invalid timestamp".into()))?;
    let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
        .ok_or_else(|| LmdbCacheError::Serialization("timestamp out of range".into()))?;
    let record: Record = serde_json::from_slice(&bytes[8..])
        .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
    Ok((record, stored_at))
}

/// LMDB-backed cache tier.
///
/// # Example
///
/// ```ignore
/// use quarry_storage::{CacheTier, LmdbTier};
/// use quarry_core::{Record, TtlClass};
///
/// let tier = LmdbTier::new("/var/cache/quarry", 256)?;
/// tier.put(34, &Record::new("Tritanium", "inventory_type"), &TtlClass::names()).await?;
/// let cached = tier.get(34, &TtlClass::names()).await?;
/// ```
pub struct LmdbTier {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    counters: TierCounters,
}

impl LmdbTier {
    /// Create a new LMDB tier.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this tier and
        // never concurrently by another environment in the same process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            counters: TierCounters::default(),
        })
    }

    /// Read the raw entry for a key inside an open read transaction.
    fn read_entry(
        &self,
        rtxn: &RoTxn,
        key: Key,
        class: &TtlClass,
    ) -> Result<Option<CacheEntry>, LmdbCacheError> {
        let encoded = ClassScopedKey::new(class.name(), key).encode();
        match self.db.get(rtxn, encoded.as_slice()).map_err(txn_error)? {
            Some(bytes) => {
                let (record, stored_at) = decode_value(bytes)?;
                Ok(Some(CacheEntry::stored_at(key, record, class, stored_at)))
            }
            None => Ok(None),
        }
    }

    /// Read a key for serving. An undecodable value is a miss for that key
    /// alone and is counted as an error; transaction failures still fail the
    /// whole read.
    fn read_servable(
        &self,
        rtxn: &RoTxn,
        key: Key,
        class: &TtlClass,
        now: DateTime<Utc>,
    ) -> Result<Option<Record>, CacheError> {
        match self.read_entry(rtxn, key, class) {
            Ok(entry) => Ok(entry
                .filter(|entry| entry.is_servable(class, now))
                .map(|entry| entry.record)),
            Err(LmdbCacheError::Serialization(reason)) => {
                self.counters.record_error();
                warn!(key, class = class.name(), reason = %reason, "Undecodable LMDB value");
                Ok(None)
            }
            Err(e) => self.track(Err(e)),
        }
    }

    /// Iterate over keys matching a prefix and collect them with their values.
    fn collect_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        let mut found = Vec::new();
        for result in iter {
            match result {
                Ok((key, value)) => {
                    if key.starts_with(prefix) {
                        found.push((key.to_vec(), value.to_vec()));
                    }
                }
                Err(_) => continue,
            }
        }
        Ok(found)
    }

    /// Delete a set of raw keys in one write transaction.
    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key.as_slice()).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    /// Remove every entry of a class, fresh or not.
    pub fn invalidate_class(&self, class: &TtlClass) -> Result<u64, CacheError> {
        let prefix = ClassScopedKey::class_prefix(class.name());
        let keys: Vec<Vec<u8>> = self
            .collect_with_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        Ok(self.delete_keys(&keys)?)
    }

    /// Number of stored entries across all classes.
    pub fn entry_count(&self) -> u64 {
        self.env
            .read_txn()
            .ok()
            .and_then(|rtxn| self.db.len(&rtxn).ok())
            .unwrap_or(0)
    }

    fn track<T>(&self, result: Result<T, LmdbCacheError>) -> Result<T, CacheError> {
        result.map_err(|e| {
            self.counters.record_error();
            e.into()
        })
    }
}

#[async_trait]
impl CacheTier for LmdbTier {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn get(&self, key: Key, class: &TtlClass) -> Result<Option<Record>, CacheError> {
        let rtxn = self.track(self.env.read_txn().map_err(txn_error))?;
        match self.read_servable(&rtxn, key, class, Utc::now())? {
            Some(record) => {
                self.counters.record_hit();
                Ok(Some(record))
            }
            None => {
                self.counters.record_miss();
                Ok(None)
            }
        }
    }

    async fn put(&self, key: Key, record: &Record, class: &TtlClass) -> Result<(), CacheError> {
        self.put_many(&[(key, record.clone())], class).await
    }

    async fn get_many(&self, keys: &[Key], class: &TtlClass) -> Result<TierLookup, CacheError> {
        let rtxn = self.track(self.env.read_txn().map_err(txn_error))?;
        let now = Utc::now();

        let mut lookup = TierLookup::default();
        for &key in keys {
            match self.read_servable(&rtxn, key, class, now)? {
                Some(record) => lookup.hit(key, record),
                None => lookup.miss(key),
            }
        }
        self.counters.record_lookup(&lookup);
        Ok(lookup)
    }

    async fn put_many(&self, records: &[(Key, Record)], class: &TtlClass) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }
        let stored_at = Utc::now();
        let write = || -> Result<(), LmdbCacheError> {
            let mut wtxn = self.env.write_txn().map_err(txn_error)?;
            for (key, record) in records {
                let encoded = ClassScopedKey::new(class.name(), *key).encode();
                let value = encode_value(record, stored_at)?;
                self.db
                    .put(&mut wtxn, encoded.as_slice(), value.as_slice())
                    .map_err(txn_error)?;
            }
            wtxn.commit().map_err(txn_error)
        };
        self.track(write())?;
        self.counters.record_writes(records.len());
        Ok(())
    }

    async fn purge_expired(&self, class: &TtlClass) -> Result<u64, CacheError> {
        let prefix = ClassScopedKey::class_prefix(class.name());
        let now = Utc::now();
        let expired: Vec<Vec<u8>> = self
            .track(self.collect_with_prefix(&prefix))?
            .into_iter()
            .filter(|(_, value)| match decode_value(value) {
                Ok((_, stored_at)) => class.is_expired(stored_at, now),
                // Undecodable values can never be served; drop them too.
                Err(_) => true,
            })
            .map(|(key, _)| key)
            .collect();
        self.track(self.delete_keys(&expired))
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_tier() -> (LmdbTier, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let tier = LmdbTier::new(temp_dir.path(), 10).expect("tier creation should succeed");
        (tier, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (tier, _temp_dir) = create_test_tier();
        let class = TtlClass::names();
        let record = Record::new("Amarr", "faction");

        tier.put(500003, &record, &class)
            .await
            .expect("put should succeed");

        let cached = tier.get(500003, &class).await.expect("get should succeed");
        let cached = cached.expect("cached should be Some");
        assert_eq!(cached.name, "Amarr");
        assert_eq!(cached.category, "faction");
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (tier, _temp_dir) = create_test_tier();
        let cached = tier
            .get(42, &TtlClass::names())
            .await
            .expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_class_isolation() {
        let (tier, _temp_dir) = create_test_tier();
        tier.put(1, &Record::new("a", "b"), &TtlClass::names())
            .await
            .expect("put should succeed");

        let cached = tier
            .get(1, &TtlClass::market())
            .await
            .expect("get should succeed");
        assert!(cached.is_none(), "market class should not see names data");
    }

    #[tokio::test]
    async fn test_invalidate_class() {
        let (tier, _temp_dir) = create_test_tier();
        let names = TtlClass::names();
        let market = TtlClass::market();

        let batch: Vec<(Key, Record)> = (1..=5)
            .map(|k| (k, Record::new(format!("n{k}"), "c")))
            .collect();
        tier.put_many(&batch, &names).await.expect("put should succeed");
        tier.put(1, &Record::new("m", "c"), &market)
            .await
            .expect("put should succeed");

        let deleted = tier.invalidate_class(&names).expect("invalidate should succeed");
        assert_eq!(deleted, 5);
        assert!(tier.get(1, &market).await.unwrap().is_some());
        assert_eq!(tier.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses_and_purgeable() {
        let (tier, _temp_dir) = create_test_tier();
        let class = TtlClass::new("status", Duration::from_secs(300));
        tier.put_many(&[(1, Record::new("a", "c")), (2, Record::new("b", "c"))], &class)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let instant = TtlClass::new("status", Duration::ZERO);
        let lookup = tier.get_many(&[1, 2], &instant).await.unwrap();
        assert!(lookup.hits.is_empty());

        assert_eq!(tier.purge_expired(&instant).await.unwrap(), 2);
        assert!(tier.get(1, &class).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let (tier, _temp_dir) = create_test_tier();
        let class = TtlClass::names();

        let _ = tier.get(7, &class).await;
        tier.put(7, &Record::new("x", "y"), &class).await.unwrap();
        let _ = tier.get(7, &class).await;
        let _ = tier.get(7, &class).await;

        let stats = tier.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (tier, _temp_dir) = create_test_tier();
        let class = TtlClass::names();

        tier.put(3, &Record::placeholder(3), &class).await.unwrap();
        assert!(tier.get(3, &class).await.unwrap().is_none());

        tier.put(3, &Record::new("Resolved", "c"), &class)
            .await
            .unwrap();
        let cached = tier.get(3, &class).await.unwrap();
        assert_eq!(cached.expect("cached should be Some").name, "Resolved");
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss_for_that_key_only() {
        let (tier, _temp_dir) = create_test_tier();
        let class = TtlClass::names();
        tier.put_many(
            &[(1, Record::new("a", "c")), (3, Record::new("c", "c"))],
            &class,
        )
        .await
        .unwrap();

        let mut wtxn = tier.env.write_txn().unwrap();
        let raw = ClassScopedKey::new(class.name(), 2).encode();
        tier.db
            .put(&mut wtxn, raw.as_slice(), b"garbage".as_slice())
            .unwrap();
        wtxn.commit().unwrap();

        let lookup = tier.get_many(&[1, 2, 3], &class).await.unwrap();
        assert_eq!(lookup.hits.len(), 2);
        assert!(lookup.misses.contains(&2));
        assert_eq!(tier.stats().errors, 1);
        assert!(tier.get(2, &class).await.unwrap().is_none());
    }

    #[test]
    fn test_value_codec_rejects_short_values() {
        assert!(decode_value(&[1, 2, 3]).is_err());
    }
}
