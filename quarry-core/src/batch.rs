//! Batch splitting for bulk resolve requests.
//!
//! The remote bulk endpoint caps its payload size, so a deduplicated key set
//! is cut into bounded chunks. Keys are sorted first, which makes batches
//! reproducible across retries and stable under test.

use crate::error::ConfigError;
use crate::Key;
use std::collections::BTreeSet;

/// An ordered, deduplicated group of keys destined for one bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    keys: Vec<Key>,
}

impl Batch {
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    pub fn into_keys(self) -> Vec<Key> {
        self.keys
    }
}

/// Deduplicate keys into sorted order.
pub fn dedupe(keys: impl IntoIterator<Item = Key>) -> BTreeSet<Key> {
    keys.into_iter().collect()
}

/// Partition keys into batches of at most `max_batch_size`.
///
/// Input may contain duplicates and arrive in any order; output batches are
/// sorted, disjoint, and together cover every distinct input key exactly
/// once. Only the last batch may be short.
pub fn split(
    keys: impl IntoIterator<Item = Key>,
    max_batch_size: usize,
) -> Result<Vec<Batch>, ConfigError> {
    if max_batch_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_batch_size".to_string(),
            value: "0".to_string(),
            reason: "max_batch_size must be greater than 0".to_string(),
        });
    }

    let sorted: Vec<Key> = dedupe(keys).into_iter().collect();
    Ok(sorted
        .chunks(max_batch_size)
        .map(|chunk| Batch {
            keys: chunk.to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sorts_and_dedupes() {
        let batches = split([30, 10, 20, 10, 30], 2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].keys(), &[10, 20]);
        assert_eq!(batches[1].keys(), &[30]);
    }

    #[test]
    fn test_split_empty_input() {
        let batches = split(Vec::<Key>::new(), 1000).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_split_rejects_zero_batch_size() {
        let err = split([1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_split_exact_multiple() {
        let batches = split(1..=2000, 1000).unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 1000));
        assert!(batches[1].contains(1001));
        assert!(!batches[0].contains(1001));
    }
}
