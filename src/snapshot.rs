//! Persisted breaker state and its wire codec.

use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::state::State;

/// Immutable description of one breaker's persisted condition.
///
/// Snapshots are never updated in place; every change to a breaker produces a
/// new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    service_key: String,
    state: State,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<u64>,
}

impl StateSnapshot {
    /// Creates a snapshot.
    pub fn new(
        service_key: impl Into<String>,
        state: State,
        failure_count: u32,
        success_count: u32,
        last_failure_time: Option<u64>,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            state,
            failure_count,
            success_count,
            last_failure_time,
        }
    }

    /// The state a breaker starts in when nothing usable was persisted.
    pub fn closed(service_key: impl Into<String>) -> Self {
        Self::new(service_key, State::Closed, 0, 0, None)
    }

    /// Stable identity of the protected service.
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// Circuit state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Consecutive failures since the last reset.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Consecutive successes while half-open.
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Epoch seconds of the last recorded failure.
    pub fn last_failure_time(&self) -> Option<u64> {
        self.last_failure_time
    }
}

/// Converts snapshots to and from bytes.
pub trait SnapshotCodec: Send + Sync + 'static {
    /// Encodes a snapshot. The service key is not part of the payload.
    fn encode(&self, snapshot: &StateSnapshot) -> Result<Vec<u8>, BoxError>;

    /// Decodes a snapshot previously written for `service_key`.
    fn decode(&self, service_key: &str, bytes: &[u8]) -> Result<StateSnapshot, BoxError>;
}

/// On-disk layout shared by every codec.
///
/// A `last_failure_time` of `0`, `null`, or a missing field all mean "never".
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    state: State,
    failure_count: u32,
    success_count: u32,
    #[serde(default)]
    last_failure_time: Option<u64>,
}

impl PersistedState {
    fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self {
            state: snapshot.state,
            failure_count: snapshot.failure_count,
            success_count: snapshot.success_count,
            last_failure_time: Some(snapshot.last_failure_time.unwrap_or(0)),
        }
    }

    fn into_snapshot(self, service_key: &str) -> StateSnapshot {
        StateSnapshot::new(
            service_key,
            self.state,
            self.failure_count,
            self.success_count,
            self.last_failure_time.filter(|t| *t != 0),
        )
    }
}

/// JSON codec: `{"state":"open","failure_count":3,"success_count":0,"last_failure_time":1700000000}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    fn encode(&self, snapshot: &StateSnapshot) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(&PersistedState::from_snapshot(snapshot))?)
    }

    fn decode(&self, service_key: &str, bytes: &[u8]) -> Result<StateSnapshot, BoxError> {
        let persisted: PersistedState = serde_json::from_slice(bytes)?;
        Ok(persisted.into_snapshot(service_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_persisted_layout() {
        let snapshot = StateSnapshot::new("svc", State::HalfOpen, 3, 1, Some(1_700_000_000));
        let bytes = JsonCodec.encode(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "state": "half-open",
                "failure_count": 3,
                "success_count": 1,
                "last_failure_time": 1_700_000_000u64,
            })
        );
    }

    #[test]
    fn never_failed_is_written_as_zero() {
        let bytes = JsonCodec.encode(&StateSnapshot::closed("svc")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["last_failure_time"], 0);
    }

    #[test]
    fn zero_null_and_missing_times_mean_never() {
        for payload in [
            r#"{"state":"closed","failure_count":0,"success_count":0,"last_failure_time":0}"#,
            r#"{"state":"closed","failure_count":0,"success_count":0,"last_failure_time":null}"#,
            r#"{"state":"closed","failure_count":0,"success_count":0}"#,
        ] {
            let snapshot = JsonCodec.decode("svc", payload.as_bytes()).unwrap();
            assert_eq!(snapshot, StateSnapshot::closed("svc"));
        }
    }

    #[test]
    fn rejects_unknown_state_and_missing_counts() {
        assert!(JsonCodec
            .decode("svc", br#"{"state":"ajar","failure_count":0,"success_count":0}"#)
            .is_err());
        assert!(JsonCodec.decode("svc", br#"{"state":"open"}"#).is_err());
        assert!(JsonCodec
            .decode("svc", br#"{"state":"open","failure_count":-1,"success_count":0}"#)
            .is_err());
        assert!(JsonCodec.decode("svc", b"\x00\x01garbage").is_err());
    }
}
