//! # durable-breaker
//!
//! A circuit breaker whose state survives process restarts and can be shared
//! between processes through a pluggable storage layer.
//!
//! ## What is a Circuit Breaker?
//!
//! The Circuit Breaker pattern helps prevent cascading failures in distributed systems
//! by temporarily disabling operations that are likely to fail. It operates in three states:
//!
//! - **Closed**: Normal operation. Calls pass through and consecutive failures are counted.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After the timeout, a bounded number of concurrent trial calls are
//!   permitted to check if the underlying resource has recovered.
//!
//! Every change is written through a [`StateRepository`] to a [`StorageAdapter`]:
//! in memory, on disk, in an external cache, or in a [`FallbackStorage`] chain of those.
//!
//! ## Basic Usage
//!
//! ```rust
//! use durable_breaker::{BreakerConfig, BreakerError, CircuitBreaker};
//! use std::error::Error;
//! use std::fmt;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "Service error: {}", self.0)
//!     }
//! }
//!
//! impl Error for ServiceError {}
//!
//! let config = BreakerConfig {
//!     failure_threshold: 3,
//!     timeout: Duration::from_secs(30),
//!     ..BreakerConfig::default()
//! };
//! let breaker = CircuitBreaker::<ServiceError>::in_memory("inventory", config).unwrap();
//!
//! match breaker.call(|| Ok::<_, ServiceError>("Success".to_string())) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::Open { .. }) => println!("Circuit is open, call was prevented"),
//!     Err(BreakerError::Operation(err)) => println!("Call failed: {}", err),
//!     Err(err) => println!("Other error: {}", err),
//! }
//! ```
//!
//! ## Persistent state
//!
//! ```rust,no_run
//! use durable_breaker::{BreakerConfig, CircuitBreaker, FileStorage, StateRepository};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileStorage::new("/var/lib/myapp/breakers")?);
//! let repository = Arc::new(StateRepository::new(storage));
//! let breaker = CircuitBreaker::<std::io::Error>::new("billing", BreakerConfig::default(), repository)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `async` - `call_async` for futures
//! - `prometheus` - Prometheus metrics integration
//! - `serde-config` - `Serialize`/`Deserialize` for [`BreakerConfig`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod error;
mod health;
mod hook;
mod metrics;
pub mod prelude;
mod registry;
mod repository;
mod snapshot;
mod state;
pub mod storage;

// Re-exports
pub use breaker::CircuitBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BreakerConfig;
pub use error::{BoxError, BreakerError, BreakerResult, ConfigError, StorageError};
pub use health::{HealthReport, HealthStatus};
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
#[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
pub use metrics::PrometheusMetricSink;
pub use metrics::{MetricSink, NullMetricSink};
pub use registry::BreakerRegistry;
pub use repository::StateRepository;
pub use snapshot::{JsonCodec, SnapshotCodec, StateSnapshot};
pub use state::{ParseStateError, State};
pub use storage::{
    storage_key, CacheStorage, ExternalCache, FallbackStorage, FileStorage, FileStorageOptions,
    MemoryStorage, StorageAdapter, StorageObserver, StorageOperation, TracingObserver,
};
