//! Maps service keys to persisted snapshots.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::snapshot::{JsonCodec, SnapshotCodec, StateSnapshot};
use crate::storage::{storage_key, StorageAdapter};

/// Loads and saves [`StateSnapshot`]s through a [`StorageAdapter`].
///
/// Loading never fails: anything that cannot be read or decoded is treated as
/// "no prior state" and yields [`StateSnapshot::closed`]. Saving does fail,
/// since silently dropping state is unsafe.
pub struct StateRepository {
    storage: Arc<dyn StorageAdapter>,
    codec: Box<dyn SnapshotCodec>,
    write_locks: Mutex<AHashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for StateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRepository")
            .field("storage", &self.storage.name())
            .finish_non_exhaustive()
    }
}

impl StateRepository {
    /// Creates a repository that stores snapshots as JSON.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_codec(storage, JsonCodec)
    }

    /// Creates a repository with a custom codec.
    pub fn with_codec(storage: Arc<dyn StorageAdapter>, codec: impl SnapshotCodec) -> Self {
        Self {
            storage,
            codec: Box::new(codec),
            write_locks: Mutex::new(AHashMap::new()),
        }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Loads the snapshot for `service_key`, defaulting to closed.
    pub fn load(&self, service_key: &str) -> StateSnapshot {
        let key = storage_key(service_key);

        let bytes = match self.storage.read(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return StateSnapshot::closed(service_key),
            Err(e) => {
                tracing::warn!(service = service_key, error = %e, "Failed to read circuit state, starting closed");
                return StateSnapshot::closed(service_key);
            }
        };

        self.codec
            .decode(service_key, &bytes)
            .unwrap_or_else(|e| {
                tracing::warn!(service = service_key, error = %e, "Discarding unreadable circuit state, starting closed");
                StateSnapshot::closed(service_key)
            })
    }

    /// Persists `snapshot`, overwriting whatever was stored for its service.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), StorageError> {
        let bytes = self
            .codec
            .encode(snapshot)
            .map_err(|source| StorageError::Encode {
                service: snapshot.service_key().to_string(),
                source,
            })?;
        let key = storage_key(snapshot.service_key());

        self.with_write_lock(&key, || self.storage.write(&key, &bytes, None))
    }

    /// Returns true if state has been persisted for `service_key`.
    pub fn exists(&self, service_key: &str) -> Result<bool, StorageError> {
        self.storage.exists(&storage_key(service_key))
    }

    /// Forgets the persisted state of `service_key`.
    pub fn delete(&self, service_key: &str) -> Result<(), StorageError> {
        let key = storage_key(service_key);
        self.with_write_lock(&key, || self.storage.delete(&key))
    }

    /// Runs `op` while holding the per-key write lock.
    ///
    /// The lock entry is dropped again once no other writer holds it, so the
    /// map only ever contains keys with a write in flight.
    fn with_write_lock<T>(&self, key: &str, op: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(
            self.write_locks
                .lock()
                .entry(key.to_string())
                .or_default(),
        );

        let result = {
            let _guard = lock.lock();
            op()
        };

        let mut locks = self.write_locks.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::State;

    fn repository() -> (Arc<MemoryStorage>, StateRepository) {
        let storage = Arc::new(MemoryStorage::new());
        let repository = StateRepository::new(Arc::clone(&storage) as Arc<dyn StorageAdapter>);
        (storage, repository)
    }

    #[test]
    fn missing_state_loads_as_closed() {
        let (_, repository) = repository();
        assert_eq!(repository.load("payments"), StateSnapshot::closed("payments"));
        assert!(!repository.exists("payments").unwrap());
    }

    #[test]
    fn saved_state_loads_back() {
        let (storage, repository) = repository();
        let snapshot = StateSnapshot::new("payments", State::Open, 3, 0, Some(1_000));

        repository.save(&snapshot).unwrap();

        assert_eq!(repository.load("payments"), snapshot);
        assert!(storage.exists(&storage_key("payments")).unwrap());
        assert_eq!(repository.load("billing"), StateSnapshot::closed("billing"));
    }

    #[test]
    fn corrupt_state_loads_as_closed() {
        let (storage, repository) = repository();
        storage
            .write(&storage_key("payments"), b"{\"state\":\"melted\"", None)
            .unwrap();

        assert_eq!(repository.load("payments"), StateSnapshot::closed("payments"));
    }

    #[test]
    fn delete_forgets_state() {
        let (_, repository) = repository();
        repository
            .save(&StateSnapshot::new("payments", State::Open, 3, 0, Some(1_000)))
            .unwrap();

        repository.delete("payments").unwrap();
        assert_eq!(repository.load("payments"), StateSnapshot::closed("payments"));
    }

    #[test]
    fn write_locks_are_released_after_each_write() {
        let (_, repository) = repository();

        for service in ["payments", "billing", "search"] {
            repository
                .save(&StateSnapshot::new(service, State::Open, 1, 0, Some(5)))
                .unwrap();
        }
        repository.delete("billing").unwrap();

        assert!(repository.write_locks.lock().is_empty());
    }

    #[test]
    fn concurrent_saves_leave_no_write_locks_behind() {
        let (_, repository) = repository();

        std::thread::scope(|scope| {
            for i in 0..8u32 {
                let repository = &repository;
                scope.spawn(move || {
                    for n in 0..50 {
                        let snapshot = StateSnapshot::new("payments", State::Open, i * 100 + n, 0, Some(1));
                        repository.save(&snapshot).unwrap();
                    }
                });
            }
        });

        assert!(repository.write_locks.lock().is_empty());
        assert_eq!(repository.load("payments").state(), State::Open);
    }
}
