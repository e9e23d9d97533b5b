//! Configuration for circuit breakers.

use std::time::Duration;

use crate::error::ConfigError;

/// Thresholds and timing for a circuit breaker.
///
/// Construct it directly, through [`BreakerConfig::new`], or by updating
/// [`BreakerConfig::default`]. Every breaker constructor validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BreakerConfig {
    /// Consecutive failures in the closed state that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive successes in the half-open state that close the circuit.
    pub success_threshold: u32,

    /// How long the circuit stays open before admitting trial calls.
    ///
    /// Timestamps are persisted as epoch seconds, so only whole seconds count.
    #[cfg_attr(feature = "serde-config", serde(with = "secs"))]
    pub timeout: Duration,

    /// Trial calls allowed in flight at once while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_attempts: 1,
        }
    }
}

impl BreakerConfig {
    /// Creates a validated configuration.
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
        half_open_max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            failure_threshold,
            success_threshold,
            timeout,
            half_open_max_attempts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every threshold is at least one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::FailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::SuccessThreshold);
        }
        if self.half_open_max_attempts == 0 {
            return Err(ConfigError::HalfOpenMaxAttempts);
        }
        Ok(())
    }

    /// The open timeout in whole seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

#[cfg(feature = "serde-config")]
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
