//! Validity filtering of keys before dispatch.
//!
//! Some keys can never be answered by the remote service (IDs of an entity
//! type it does not resolve, or outside its ID space). Sending them wastes
//! batch slots and, worse, can poison a whole bulk response. The filter is a
//! pure check: authoritative for network dispatch, advisory for cache
//! lookups.

use crate::Key;
use std::ops::RangeInclusive;

/// Decides whether a key is inside the remote's addressable ID space.
pub trait KeyFilter: Send + Sync {
    fn is_addressable(&self, key: Key) -> bool;
}

/// Filter that lets every key through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl KeyFilter for AcceptAll {
    fn is_addressable(&self, _key: Key) -> bool {
        true
    }
}

/// Filter accepting keys inside any of a set of inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    ranges: Vec<RangeInclusive<Key>>,
}

impl RangeFilter {
    /// Largest ID the remote accepts: IDs travel as 32-bit signed integers.
    pub const MAX_SIGNED_32: Key = i32::MAX as Key;

    pub fn new(ranges: impl IntoIterator<Item = RangeInclusive<Key>>) -> Self {
        Self {
            ranges: ranges.into_iter().filter(|r| !r.is_empty()).collect(),
        }
    }

    /// Positive 32-bit signed IDs, the remote's full ID space.
    pub fn signed_32bit() -> Self {
        Self::new([1..=Self::MAX_SIGNED_32])
    }

    pub fn ranges(&self) -> &[RangeInclusive<Key>] {
        &self.ranges
    }
}

/// The whole positive 32-bit ID space.
///
/// This only rejects keys the remote can never parse. IDs inside that space
/// that belong to another entity type (999999999 for a names lookup, say)
/// still pass; call sites whose remote answers a narrower range must install
/// their own filter with `ResolverService::with_filter`.
impl Default for RangeFilter {
    fn default() -> Self {
        Self::signed_32bit()
    }
}

impl KeyFilter for RangeFilter {
    fn is_addressable(&self, key: Key) -> bool {
        self.ranges.iter().any(|range| range.contains(&key))
    }
}

/// Split keys into `(addressable, unaddressable)`, preserving input order.
pub fn partition<F>(filter: &F, keys: impl IntoIterator<Item = Key>) -> (Vec<Key>, Vec<Key>)
where
    F: KeyFilter + ?Sized,
{
    keys.into_iter().partition(|key| filter.is_addressable(*key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rejects_zero_and_out_of_range() {
        let filter = RangeFilter::default();
        assert!(!filter.is_addressable(0));
        assert!(filter.is_addressable(1));
        assert!(filter.is_addressable(RangeFilter::MAX_SIGNED_32));
        assert!(!filter.is_addressable(RangeFilter::MAX_SIGNED_32 + 1));
    }

    #[test]
    fn test_default_is_not_entity_aware() {
        // Wrong-type IDs inside the 32-bit space need a narrower filter.
        assert!(RangeFilter::default().is_addressable(999_999_999));
        assert!(!RangeFilter::new([1..=500_000_000]).is_addressable(999_999_999));
    }

    #[test]
    fn test_multiple_ranges() {
        let filter = RangeFilter::new([500_000..=2_000_000, 90_000_000..=98_000_000]);
        assert!(filter.is_addressable(500_000));
        assert!(filter.is_addressable(95_000_000));
        assert!(!filter.is_addressable(3_000_000));
        assert!(!filter.is_addressable(999_999_999));
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn test_empty_ranges_are_dropped() {
        let filter = RangeFilter::new([10..=1, 5..=5]);
        assert_eq!(filter.ranges().len(), 1);
        assert!(filter.is_addressable(5));
    }

    #[test]
    fn test_partition_preserves_order() {
        let filter = RangeFilter::new([1..=100]);
        let (ok, rejected) = partition(&filter, [50, 0, 7, 500, 3]);
        assert_eq!(ok, vec![50, 7, 3]);
        assert_eq!(rejected, vec![0, 500]);
    }

    #[test]
    fn test_partition_through_trait_object() {
        let filter: Box<dyn KeyFilter> = Box::new(AcceptAll);
        let (ok, rejected) = partition(filter.as_ref(), [0, u64::MAX]);
        assert_eq!(ok.len(), 2);
        assert!(rejected.is_empty());
    }
}
