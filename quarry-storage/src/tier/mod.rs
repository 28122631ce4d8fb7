//! Cache tiers and their composition.
//!
//! Every tier implements [`CacheTier`]; a [`TierChain`] stacks them in
//! precedence order. Freshness is always judged against the caller's
//! [`TtlClass`](quarry_core::TtlClass): a tier never decides on its own how
//! long an entry stays valid.
//!
//! # Tiers
//!
//! - [`MemoryTier`]: in-process map, optionally capped
//! - [`FileTier`]: one JSON document per TTL class
//! - [`LmdbTier`]: persistent LMDB store with [`ClassScopedKey`] keys

pub mod chain;
pub mod class_key;
pub mod file;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use chain::{ChainLookup, TierChain};
pub use class_key::ClassScopedKey;
pub use file::FileTier;
pub use lmdb_backend::{LmdbCacheError, LmdbTier};
pub use memory::MemoryTier;
pub use traits::{CacheStats, CacheTier, TierLookup};
