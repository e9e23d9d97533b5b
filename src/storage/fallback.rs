//! A chain of storage adapters that degrades gracefully.
//!
//! Reads take the first value found, walking the chain in order. Writes,
//! deletes and clears go to every adapter and succeed if any one of them does.
//! There is no cross-backend consistency: a backend that missed a write keeps
//! serving its older value until it is written again.

use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;

use super::{StorageAdapter, StorageOperation};
use crate::error::StorageError;

/// Receives the failures of individual adapters in a [`FallbackStorage`].
pub trait StorageObserver: Send + Sync + 'static {
    /// Called once per failing adapter, before the chain moves on.
    fn adapter_failed(&self, adapter: &str, operation: StorageOperation, error: &StorageError);
}

/// Logs adapter failures as `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StorageObserver for TracingObserver {
    fn adapter_failed(&self, adapter: &str, operation: StorageOperation, error: &StorageError) {
        tracing::warn!(
            adapter,
            operation = %operation,
            error = %error,
            cause = ?std::error::Error::source(error).map(ToString::to_string),
            "Storage adapter failed, continuing with the next one"
        );
    }
}

type Adapters = SmallVec<[Arc<dyn StorageAdapter>; 4]>;

/// Tries an ordered list of adapters.
pub struct FallbackStorage {
    adapters: Adapters,
    observer: Arc<dyn StorageObserver>,
}

impl std::fmt::Debug for FallbackStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStorage")
            .field("adapters", &self.adapter_names())
            .finish_non_exhaustive()
    }
}

impl FallbackStorage {
    /// Chains `adapters` in priority order, logging failures with [`TracingObserver`].
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn StorageAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().collect(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the failure observer.
    pub fn with_observer(mut self, observer: impl StorageObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Names of the chained adapters, in order.
    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    fn report(&self, adapter: &dyn StorageAdapter, operation: StorageOperation, error: &StorageError) {
        self.observer.adapter_failed(adapter.name(), operation, error);
    }

    fn all_failed(&self, operation: StorageOperation, last: Option<StorageError>) -> StorageError {
        match last {
            Some(last) => StorageError::AllAdaptersFailed {
                operation,
                attempted: self.adapters.len(),
                source: Box::new(last),
            },
            None => StorageError::NoAdapters,
        }
    }

    /// Runs `op` on every adapter; succeeds if at least one did.
    fn broadcast<F>(&self, operation: StorageOperation, op: F) -> Result<(), StorageError>
    where
        F: Fn(&dyn StorageAdapter) -> Result<(), StorageError>,
    {
        let mut succeeded = false;
        let mut last_error = None;

        for adapter in &self.adapters {
            match op(adapter.as_ref()) {
                Ok(()) => succeeded = true,
                Err(e) => {
                    self.report(adapter.as_ref(), operation, &e);
                    last_error = Some(e);
                }
            }
        }

        if succeeded {
            Ok(())
        } else {
            Err(self.all_failed(operation, last_error))
        }
    }
}

impl StorageAdapter for FallbackStorage {
    fn name(&self) -> &str {
        "fallback"
    }

    /// Returns the first value found. A miss moves on like a failure does, but
    /// the chain only errors when no adapter answered at all.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut answered = false;
        let mut last_error = None;

        for adapter in &self.adapters {
            match adapter.read(key) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => answered = true,
                Err(e) => {
                    self.report(adapter.as_ref(), StorageOperation::Read, &e);
                    last_error = Some(e);
                }
            }
        }

        if answered {
            Ok(None)
        } else {
            Err(self.all_failed(StorageOperation::Read, last_error))
        }
    }

    fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.broadcast(StorageOperation::Write, |a| a.write(key, value, ttl))
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut answered = false;
        let mut last_error = None;

        for adapter in &self.adapters {
            match adapter.exists(key) {
                Ok(true) => return Ok(true),
                Ok(false) => answered = true,
                Err(e) => {
                    self.report(adapter.as_ref(), StorageOperation::Exists, &e);
                    last_error = Some(e);
                }
            }
        }

        if answered {
            Ok(false)
        } else {
            Err(self.all_failed(StorageOperation::Exists, last_error))
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.broadcast(StorageOperation::Delete, |a| a.delete(key))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.broadcast(StorageOperation::Clear, |a| a.clear())
    }
}
