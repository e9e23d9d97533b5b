//! Error types for the circuit breaker library.

use thiserror::Error;

use crate::state::State;
use crate::storage::StorageOperation;

/// Boxed error used as the cause of storage failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for circuit breaker operations.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit rejected the call; the operation was never executed.
    ///
    /// Raised while open, and while half-open once every trial slot is taken.
    #[error("Circuit breaker for `{service}` is {state} ({failure_count} consecutive failures)")]
    Open {
        /// Service key of the breaker that rejected the call.
        service: String,
        /// State the breaker was in when it rejected the call.
        state: State,
        /// Failure count at the time of rejection.
        failure_count: u32,
    },

    /// The underlying operation failed.
    #[error("Operation error: {0}")]
    Operation(#[source] E),

    /// The circuit state could not be persisted.
    #[error("Failed to persist circuit state: {0}")]
    Storage(#[source] StorageError),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected without running the operation.
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Returns the operation's own error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker configuration. Raised at construction time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `failure_threshold` was zero.
    #[error("failure_threshold must be at least 1")]
    FailureThreshold,

    /// `success_threshold` was zero.
    #[error("success_threshold must be at least 1")]
    SuccessThreshold,

    /// `half_open_max_attempts` was zero.
    #[error("half_open_max_attempts must be at least 1")]
    HalfOpenMaxAttempts,
}

/// Errors raised by storage adapters and the state repository.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading a key failed.
    #[error("{adapter} storage failed to read `{key}`")]
    Read {
        /// Name of the adapter.
        adapter: String,
        /// Storage key.
        key: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Writing a key failed.
    #[error("{adapter} storage failed to write `{key}`")]
    Write {
        /// Name of the adapter.
        adapter: String,
        /// Storage key.
        key: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Checking for a key failed.
    #[error("{adapter} storage failed to check `{key}`")]
    Exists {
        /// Name of the adapter.
        adapter: String,
        /// Storage key.
        key: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Deleting a key failed.
    #[error("{adapter} storage failed to delete `{key}`")]
    Delete {
        /// Name of the adapter.
        adapter: String,
        /// Storage key.
        key: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Clearing the adapter failed.
    #[error("{adapter} storage failed to clear")]
    Clear {
        /// Name of the adapter.
        adapter: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A snapshot could not be encoded.
    #[error("failed to encode snapshot for `{service}`")]
    Encode {
        /// Service key of the snapshot.
        service: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Every adapter in a fallback chain failed. The last failure is the source.
    #[error("all {attempted} storage adapters failed to {operation}")]
    AllAdaptersFailed {
        /// Operation that was attempted.
        operation: StorageOperation,
        /// Number of adapters tried.
        attempted: usize,
        /// Failure of the last adapter tried.
        #[source]
        source: Box<StorageError>,
    },

    /// A fallback chain was used without any adapters.
    #[error("no storage adapters configured")]
    NoAdapters,
}

impl StorageError {
    pub(crate) fn read(adapter: &str, key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::Read {
            adapter: adapter.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn write(adapter: &str, key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::Write {
            adapter: adapter.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn exists(adapter: &str, key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::Exists {
            adapter: adapter.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn delete(adapter: &str, key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::Delete {
            adapter: adapter.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn clear(adapter: &str, source: impl Into<BoxError>) -> Self {
        StorageError::Clear {
            adapter: adapter.to_string(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn aggregate_error_keeps_last_cause() {
        let last = StorageError::write("file", "cb_abc", io::Error::other("disk full"));
        let err = StorageError::AllAdaptersFailed {
            operation: StorageOperation::Write,
            attempted: 2,
            source: Box::new(last),
        };

        assert_eq!(err.to_string(), "all 2 storage adapters failed to write");
        let cause = err.source().expect("aggregate has a cause");
        assert_eq!(cause.to_string(), "file storage failed to write `cb_abc`");
        assert_eq!(
            cause.source().map(|e| e.to_string()).as_deref(),
            Some("disk full")
        );
    }

    #[test]
    fn rejection_carries_breaker_data() {
        let err: BreakerError<io::Error> = BreakerError::Open {
            service: "payments".into(),
            state: State::Open,
            failure_count: 3,
        };
        assert!(err.is_rejected());
        assert_eq!(
            err.to_string(),
            "Circuit breaker for `payments` is open (3 consecutive failures)"
        );
        assert!(err.into_operation().is_none());
    }
}
