//! Byte-level storage backends for persisted breaker state.
//!
//! A [`StorageAdapter`] knows nothing about breakers: it maps string keys to
//! opaque bytes. The [`StateRepository`](crate::StateRepository) sits on top
//! and decides what the bytes mean.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::error::StorageError;

pub mod cache;
pub mod fallback;
pub mod file;
pub mod memory;

pub use cache::{CacheStorage, ExternalCache};
pub use fallback::{FallbackStorage, StorageObserver, TracingObserver};
pub use file::{FileStorage, FileStorageOptions};
pub use memory::MemoryStorage;

/// Prefix of every key derived by [`storage_key`].
pub const KEY_PREFIX: &str = "cb_";

const KEY_HASH_LEN: usize = 32;

/// A raw key to bytes store.
pub trait StorageAdapter: Send + Sync + 'static {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    /// Returns the value stored under `key`, or `None` if there is none.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `value` under `key`. Adapters that cannot expire entries ignore `ttl`.
    fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Returns true if a value is stored under `key`.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes `key`. Removing a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Removes every key.
    fn clear(&self) -> Result<(), StorageError>;
}

/// The storage operations, for errors and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOperation {
    /// [`StorageAdapter::read`]
    Read,
    /// [`StorageAdapter::write`]
    Write,
    /// [`StorageAdapter::exists`]
    Exists,
    /// [`StorageAdapter::delete`]
    Delete,
    /// [`StorageAdapter::clear`]
    Clear,
}

impl Display for StorageOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageOperation::Read => "read",
            StorageOperation::Write => "write",
            StorageOperation::Exists => "check",
            StorageOperation::Delete => "delete",
            StorageOperation::Clear => "clear",
        })
    }
}

/// Derives the storage key for a service.
///
/// The service key is hashed so that any name, including ones with path
/// separators or other unsafe characters, maps to a fixed-length key made of
/// `[0-9a-f]`.
pub fn storage_key(service_key: &str) -> String {
    let hash = blake3::hash(service_key.as_bytes());
    format!("{KEY_PREFIX}{}", &hash.to_hex()[..KEY_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_are_fixed_length_and_safe() {
        let plain = storage_key("payments");
        let nasty = storage_key("../../etc/passwd?x=1 & café");

        assert_eq!(plain.len(), KEY_PREFIX.len() + KEY_HASH_LEN);
        assert_eq!(nasty.len(), plain.len());
        assert!(nasty.starts_with(KEY_PREFIX));
        assert!(nasty[KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn storage_keys_are_stable_and_distinct() {
        assert_eq!(storage_key("payments"), storage_key("payments"));
        assert_ne!(storage_key("payments"), storage_key("Payments"));
    }
}
