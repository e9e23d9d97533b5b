//! Health reports for operational dashboards.

use serde::Serialize;

use crate::state::State;

/// Coarse health of a protected service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Closed: calls flow normally.
    Healthy,
    /// Half-open: recovery is being tested with trial calls.
    Degraded,
    /// Open: calls are failing fast.
    Unhealthy,
}

impl From<State> for HealthStatus {
    fn from(state: State) -> Self {
        match state {
            State::Closed => HealthStatus::Healthy,
            State::HalfOpen => HealthStatus::Degraded,
            State::Open => HealthStatus::Unhealthy,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Service key.
    pub service: String,
    /// Health derived from the state.
    pub status: HealthStatus,
    /// Circuit state.
    pub state: State,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Consecutive half-open successes.
    pub success_count: u32,
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Epoch seconds of the last failure.
    pub last_failure_time: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_for_dashboards() {
        let report = HealthReport {
            service: "db".into(),
            status: State::HalfOpen.into(),
            state: State::HalfOpen,
            failure_count: 0,
            success_count: 1,
            failure_threshold: 3,
            success_threshold: 2,
            last_failure_time: Some(1_000),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "degraded");
        assert_eq!(value["state"], "half-open");
        assert_eq!(value["last_failure_time"], 1_000);
    }
}
