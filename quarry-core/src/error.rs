//! Error types for QUARRY operations

use crate::Key;
use thiserror::Error;

/// Cache tier faults.
///
/// A miss is never an error; these only describe a tier that could not be
/// read or written at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("I/O failure in {tier} tier: {reason}")]
    Io { tier: String, reason: String },

    #[error("Serialization failure in {tier} tier: {reason}")]
    Serialization { tier: String, reason: String },

    #[error("Transaction failed in {tier} tier: {reason}")]
    TransactionFailed { tier: String, reason: String },

    #[error("Cache lock poisoned in {tier} tier")]
    LockPoisoned { tier: String },
}

impl CacheError {
    pub fn io(tier: impl Into<String>, reason: impl ToString) -> Self {
        Self::Io {
            tier: tier.into(),
            reason: reason.to_string(),
        }
    }

    pub fn serialization(tier: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            tier: tier.into(),
            reason: reason.to_string(),
        }
    }
}

/// Remote resolve failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {url} failed with status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("Batch of {size} keys exceeds the bulk limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Whole-call resolution failures.
///
/// Partial remote unavailability is never one of these; it degrades to
/// placeholders instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Offline: nothing cached and all {attempts} remote calls failed")]
    Offline { attempts: usize },

    #[error("Result coverage violated: missing {missing:?}, unexpected {extra:?}")]
    CoverageViolation { missing: Vec<Key>, extra: Vec<Key> },
}

/// Master error type for all QUARRY errors.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),
}

/// Result type alias for QUARRY operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
