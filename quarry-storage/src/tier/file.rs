//! Local file cache tier.
//!
//! Each TTL class is one JSON document under the tier's directory. Every
//! read-modify-write cycle runs under a per-tier async mutex, and documents
//! are replaced atomically (write to a temporary file, then rename), so
//! concurrent resolutions never interleave partial writes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use quarry_core::{CacheEntry, CacheError, Key, Record, TtlClass};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use super::traits::{CacheStats, CacheTier, TierCounters, TierLookup};

const TIER_NAME: &str = "file";
const FORMAT_VERSION: u32 = 1;

/// On-disk document for one TTL class.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClassDocument {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// JSON-file cache tier.
#[derive(Debug)]
pub struct FileTier {
    dir: PathBuf,
    io_lock: Mutex<()>,
    counters: TierCounters,
}

impl FileTier {
    /// Create a file tier rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(TIER_NAME, e))?;
        Ok(Self {
            dir,
            io_lock: Mutex::new(()),
            counters: TierCounters::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for a class. Class names are reduced to a safe
    /// file-name alphabet.
    pub fn class_path(&self, class: &TtlClass) -> PathBuf {
        let file_name: String = class
            .name()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    async fn load(&self, class: &TtlClass) -> Result<HashMap<Key, CacheEntry>, CacheError> {
        let path = self.class_path(class);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                self.counters.record_error();
                return Err(CacheError::io(TIER_NAME, format!("{}: {}", path.display(), e)));
            }
        };

        let document: ClassDocument = serde_json::from_slice(&bytes).map_err(|e| {
            self.counters.record_error();
            CacheError::serialization(TIER_NAME, format!("{}: {}", path.display(), e))
        })?;
        if document.version != FORMAT_VERSION {
            self.counters.record_error();
            return Err(CacheError::serialization(
                TIER_NAME,
                format!(
                    "{}: unsupported format version {}",
                    path.display(),
                    document.version
                ),
            ));
        }

        Ok(document
            .entries
            .into_iter()
            .map(|entry| (entry.key, entry))
            .collect())
    }

    /// Load a document that is about to be rewritten.
    ///
    /// An unreadable document is moved aside to `<class>.json.corrupt` and
    /// replaced by an empty one, so later writes can repair the tier.
    async fn load_for_rewrite(
        &self,
        class: &TtlClass,
    ) -> Result<HashMap<Key, CacheEntry>, CacheError> {
        match self.load(class).await {
            Err(CacheError::Serialization { reason, .. }) => {
                let path = self.class_path(class);
                let quarantine = path.with_extension("json.corrupt");
                warn!(
                    path = %path.display(),
                    quarantine = %quarantine.display(),
                    reason = %reason,
                    "Unreadable cache document moved aside"
                );
                tokio::fs::rename(&path, &quarantine).await.map_err(|e| {
                    self.counters.record_error();
                    CacheError::io(TIER_NAME, format!("{}: {}", path.display(), e))
                })?;
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    async fn save(
        &self,
        class: &TtlClass,
        entries: HashMap<Key, CacheEntry>,
    ) -> Result<(), CacheError> {
        let path = self.class_path(class);
        let mut entries: Vec<CacheEntry> = entries.into_values().collect();
        entries.sort_by_key(|entry| entry.key);
        let document = ClassDocument {
            version: FORMAT_VERSION,
            entries,
        };
        let bytes = serde_json::to_vec(&document).map_err(|e| {
            self.counters.record_error();
            CacheError::serialization(TIER_NAME, e)
        })?;

        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        written.map_err(|e| {
            self.counters.record_error();
            CacheError::io(TIER_NAME, format!("{}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl CacheTier for FileTier {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn get(&self, key: Key, class: &TtlClass) -> Result<Option<Record>, CacheError> {
        let lookup = self.get_many(&[key], class).await?;
        Ok(lookup.hits.get(&key).cloned())
    }

    async fn put(&self, key: Key, record: &Record, class: &TtlClass) -> Result<(), CacheError> {
        self.put_many(&[(key, record.clone())], class).await
    }

    async fn get_many(&self, keys: &[Key], class: &TtlClass) -> Result<TierLookup, CacheError> {
        let _guard = self.io_lock.lock().await;
        let entries = self.load(class).await?;
        let now = Utc::now();

        let mut lookup = TierLookup::default();
        for &key in keys {
            match entries
                .get(&key)
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
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load_for_rewrite(class).await?;
        let stored_at = Utc::now();
        for (key, record) in records {
            entries.insert(
                *key,
                CacheEntry::stored_at(*key, record.clone(), class, stored_at),
            );
        }
        self.save(class, entries).await?;
        self.counters.record_writes(records.len());
        Ok(())
    }

    async fn purge_expired(&self, class: &TtlClass) -> Result<u64, CacheError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load_for_rewrite(class).await?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(class, now));
        let removed = (before - entries.len()) as u64;
        if removed > 0 {
            self.save(class, entries).await?;
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        // Entry counts would need a directory scan; report writes instead.
        self.counters.snapshot(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_tier() -> (FileTier, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let tier = FileTier::new(temp_dir.path()).expect("tier creation should succeed");
        (tier, temp_dir)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_not_error() {
        let (tier, _dir) = create_test_tier();
        let lookup = tier
            .get_many(&[1, 2], &TtlClass::names())
            .await
            .expect("missing document is a miss");
        assert!(lookup.hits.is_empty());
        assert_eq!(lookup.misses.len(), 2);
    }

    #[tokio::test]
    async fn test_put_and_get_persist_across_instances() {
        let (tier, dir) = create_test_tier();
        let class = TtlClass::market();
        tier.put(34, &Record::new("Tritanium", "inventory_type"), &class)
            .await
            .unwrap();

        let reopened = FileTier::new(dir.path()).unwrap();
        let cached = reopened.get(34, &class).await.unwrap();
        assert_eq!(cached.map(|r| r.name), Some("Tritanium".to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_error() {
        let (tier, _dir) = create_test_tier();
        let class = TtlClass::names();
        std::fs::write(tier.class_path(&class), b"{not json").unwrap();

        let err = tier.get(1, &class).await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
        assert_eq!(tier.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_write_replaces_corrupt_document() {
        let (tier, _dir) = create_test_tier();
        let class = TtlClass::names();
        let path = tier.class_path(&class);
        std::fs::write(&path, b"{truncated").unwrap();

        tier.put(1, &Record::new("Tritanium", "inventory_type"), &class)
            .await
            .expect("write repairs the document");

        let cached = tier.get(1, &class).await.unwrap();
        assert_eq!(cached.map(|r| r.name), Some("Tritanium".to_string()));
        let quarantined = std::fs::read(path.with_extension("json.corrupt")).unwrap();
        assert_eq!(quarantined, b"{truncated");
    }

    #[tokio::test]
    async fn test_purge_replaces_corrupt_document() {
        let (tier, _dir) = create_test_tier();
        let class = TtlClass::names();
        std::fs::write(tier.class_path(&class), b"[]").unwrap();

        assert_eq!(tier.purge_expired(&class).await.unwrap(), 0);
        assert!(tier.get(1, &class).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_class_names_are_sanitized() {
        let (tier, dir) = create_test_tier();
        let class = TtlClass::new("../escape/attempt", Duration::from_secs(60));
        let path = tier.class_path(&class);
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.ends_with("___escape_attempt.json"));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (tier, _dir) = create_test_tier();
        let class = TtlClass::new("short", Duration::from_secs(60));
        tier.put_many(
            &[(1, Record::new("a", "c")), (2, Record::new("b", "c"))],
            &class,
        )
        .await
        .unwrap();

        assert_eq!(tier.purge_expired(&class).await.unwrap(), 0);

        let zero = TtlClass::new("short", Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(tier.purge_expired(&zero).await.unwrap(), 2);
        assert!(tier.get(1, &class).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_many_overwrites() {
        let (tier, _dir) = create_test_tier();
        let class = TtlClass::names();
        tier.put(1, &Record::new("old", "c"), &class).await.unwrap();
        tier.put_many(&[(1, Record::new("new", "c"))], &class)
            .await
            .unwrap();

        assert_eq!(tier.get(1, &class).await.unwrap().unwrap().name, "new");
    }
}
