//! Class-scoped keys for the LMDB tier.
//!
//! The same entity key can be cached under several TTL classes (a type's
//! name and its market data, say). Scoping every stored key by class name
//! keeps those entries apart and lets one class be scanned or invalidated
//! without touching the others.

use quarry_core::Key;

/// Separator byte between the class name and the entity key. Never occurs in
/// UTF-8, so class names cannot forge it.
const SEPARATOR: u8 = 0xFF;

/// A cache key scoped to a TTL class.
///
/// # Binary Format
///
/// - Bytes 0..n: class name (UTF-8)
/// - Byte n: separator (0xFF)
/// - Bytes n+1..n+9: entity key (u64, big-endian)
///
/// Big-endian keys sort numerically, so a class's entries are contiguous
/// and ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassScopedKey {
    class: String,
    key: Key,
}

impl ClassScopedKey {
    pub fn new(class: impl Into<String>, key: Key) -> Self {
        Self {
            class: class.into(),
            key,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Encode for storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::class_prefix(&self.class);
        bytes.extend_from_slice(&self.key.to_be_bytes());
        bytes
    }

    /// Decode a stored key.
    ///
    /// Returns `None` if the separator is missing, the class name is not
    /// UTF-8, or the key part is not exactly 8 bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|&b| b == SEPARATOR)?;
        let class = std::str::from_utf8(&bytes[..split]).ok()?;
        let key_bytes: [u8; 8] = bytes[split + 1..].try_into().ok()?;
        Some(Self::new(class, Key::from_be_bytes(key_bytes)))
    }

    /// Prefix shared by every key of a class.
    pub fn class_prefix(class: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(class.len() + 9);
        prefix.extend_from_slice(class.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}
