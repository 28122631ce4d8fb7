//! QUARRY Storage - Cache Tiers
//!
//! Tiered caching for resolved records: the [`CacheTier`] contract, the
//! memory, file and LMDB tiers, and the [`TierChain`] that stacks them.

pub mod tier;

pub use tier::{
    CacheStats, CacheTier, ChainLookup, ClassScopedKey, FileTier, LmdbCacheError, LmdbTier,
    MemoryTier, TierChain, TierLookup,
};

use std::sync::Arc;

use quarry_core::{CacheConfig, CacheError};

/// Build the tier chain described by a cache configuration.
///
/// The memory tier always comes first, followed by the file tier and then the
/// LMDB tier when their paths are set.
pub fn chain_from_config(config: &CacheConfig) -> Result<TierChain, CacheError> {
    let mut chain = TierChain::empty().with_tier(Arc::new(MemoryTier::with_capacity(
        config.memory_max_entries,
    )));

    if let Some(dir) = &config.file_dir {
        chain = chain.with_tier(Arc::new(FileTier::new(dir.clone())?));
    }

    if let Some(path) = &config.lmdb_path {
        let tier = LmdbTier::new(path, config.lmdb_max_size_mb)?;
        chain = chain.with_tier(Arc::new(tier));
    }

    tracing::debug!(tiers = chain.len(), "Cache tier chain built");
    Ok(chain)
}
