//! Storage backed by an external cache (Redis, Memcached, a shared map...).

use std::sync::Arc;
use std::time::Duration;

use super::StorageAdapter;
use crate::error::{BoxError, StorageError};

/// The capability a cache client must offer to back a [`CacheStorage`].
pub trait ExternalCache: Send + Sync + 'static {
    /// Fetches a value.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError>;

    /// Stores a value, expiring it after `ttl` if given.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), BoxError>;

    /// Returns true if a value is stored.
    fn has(&self, key: &str) -> Result<bool, BoxError>;

    /// Removes a value.
    fn delete(&self, key: &str) -> Result<(), BoxError>;

    /// Removes every value.
    fn clear(&self) -> Result<(), BoxError>;
}

impl<C: ExternalCache + ?Sized> ExternalCache for Arc<C> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), BoxError> {
        (**self).set(key, value, ttl)
    }

    fn has(&self, key: &str) -> Result<bool, BoxError> {
        (**self).has(key)
    }

    fn delete(&self, key: &str) -> Result<(), BoxError> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<(), BoxError> {
        (**self).clear()
    }
}

/// Adapts an [`ExternalCache`] to [`StorageAdapter`], optionally namespacing keys.
///
/// [`ExternalCache`] cannot enumerate keys, so `clear` wipes the whole cache.
/// A prefixed storage shares its cache with other users and refuses to clear.
#[derive(Debug)]
pub struct CacheStorage<C> {
    cache: C,
    prefix: String,
}

impl<C: ExternalCache> CacheStorage<C> {
    /// Wraps `cache` without a key prefix.
    pub fn new(cache: C) -> Self {
        Self::with_prefix(cache, "")
    }

    /// Wraps `cache`, prepending `prefix` to every key.
    ///
    /// [`clear`](StorageAdapter::clear) fails on the result rather than touch
    /// keys outside the namespace.
    pub fn with_prefix(cache: C, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    /// The wrapped cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl<C: ExternalCache> StorageAdapter for CacheStorage<C> {
    fn name(&self) -> &str {
        "cache"
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.cache
            .get(&self.key(key))
            .map_err(|e| StorageError::read(self.name(), key, e))
    }

    fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.cache
            .set(&self.key(key), value, ttl)
            .map_err(|e| StorageError::write(self.name(), key, e))
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.cache
            .has(&self.key(key))
            .map_err(|e| StorageError::exists(self.name(), key, e))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.cache
            .delete(&self.key(key))
            .map_err(|e| StorageError::delete(self.name(), key, e))
    }

    fn clear(&self) -> Result<(), StorageError> {
        if !self.prefix.is_empty() {
            return Err(StorageError::clear(
                self.name(),
                format!("refusing to clear the whole cache for namespace `{}`", self.prefix),
            ));
        }
        self.cache
            .clear()
            .map_err(|e| StorageError::clear(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        values: Mutex<AHashMap<String, (Vec<u8>, Option<Duration>)>>,
    }

    impl ExternalCache for RecordingCache {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError> {
            Ok(self.values.lock().get(key).map(|(v, _)| v.clone()))
        }

        fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), BoxError> {
            self.values
                .lock()
                .insert(key.to_string(), (value.to_vec(), ttl));
            Ok(())
        }

        fn has(&self, key: &str) -> Result<bool, BoxError> {
            Ok(self.values.lock().contains_key(key))
        }

        fn delete(&self, key: &str) -> Result<(), BoxError> {
            self.values.lock().remove(key);
            Ok(())
        }

        fn clear(&self) -> Result<(), BoxError> {
            self.values.lock().clear();
            Ok(())
        }
    }

    struct DownCache;

    impl ExternalCache for DownCache {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BoxError> {
            Err("connection refused".into())
        }

        fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<(), BoxError> {
            Err("connection refused".into())
        }

        fn has(&self, _key: &str) -> Result<bool, BoxError> {
            Err("connection refused".into())
        }

        fn delete(&self, _key: &str) -> Result<(), BoxError> {
            Err("connection refused".into())
        }

        fn clear(&self) -> Result<(), BoxError> {
            Err("connection refused".into())
        }
    }

    #[test]
    fn forwards_prefixed_keys_and_ttl() {
        let cache = Arc::new(RecordingCache::default());
        let storage = CacheStorage::with_prefix(Arc::clone(&cache), "breakers:");

        storage
            .write("cb_1", b"v", Some(Duration::from_secs(30)))
            .unwrap();

        assert_eq!(
            cache.values.lock().get("breakers:cb_1").cloned(),
            Some((b"v".to_vec(), Some(Duration::from_secs(30))))
        );
        assert_eq!(storage.read("cb_1").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(storage.exists("cb_1").unwrap());

        storage.delete("cb_1").unwrap();
        assert!(!storage.exists("cb_1").unwrap());
    }

    #[test]
    fn prefixed_storage_never_clears_foreign_keys() {
        let cache = Arc::new(RecordingCache::default());
        cache.set("sessions:42", b"other", None).unwrap();
        let storage = CacheStorage::with_prefix(Arc::clone(&cache), "breakers:");
        storage.write("cb_1", b"v", None).unwrap();

        assert!(matches!(storage.clear(), Err(StorageError::Clear { .. })));
        assert!(cache.has("sessions:42").unwrap());
        assert!(storage.exists("cb_1").unwrap());

        let unprefixed = CacheStorage::new(Arc::clone(&cache));
        unprefixed.clear().unwrap();
        assert!(!cache.has("sessions:42").unwrap());
    }

    #[test]
    fn cache_failures_become_storage_errors() {
        let storage = CacheStorage::new(DownCache);

        let err = storage.read("cb_1").unwrap_err();
        assert_eq!(err.to_string(), "cache storage failed to read `cb_1`");
        assert!(matches!(
            storage.write("cb_1", b"v", None),
            Err(StorageError::Write { .. })
        ));
        assert!(matches!(storage.clear(), Err(StorageError::Clear { .. })));
    }
}
