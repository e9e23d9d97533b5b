//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use durable_breaker::prelude::*;
//!
//! let breaker = CircuitBreaker::<std::io::Error>::in_memory("db", BreakerConfig::default()).unwrap();
//! assert_eq!(breaker.current_state(), State::Closed);
//! ```

pub use crate::breaker::CircuitBreaker;
pub use crate::config::BreakerConfig;
pub use crate::error::{BreakerError, BreakerResult, StorageError};
pub use crate::registry::BreakerRegistry;
pub use crate::repository::StateRepository;
pub use crate::state::State;
pub use crate::storage::{FallbackStorage, FileStorage, MemoryStorage, StorageAdapter};
