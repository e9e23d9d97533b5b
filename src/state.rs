//! Circuit breaker state machine implementation.
//!
//! [`State`] is the public name of a state. [`CircuitState`] is the active
//! state object held by the engine: a tagged union with one variant per state,
//! each owning its counters and deciding admission and transitions. The engine
//! replaces the whole value on transition and never mutates one variant into
//! another in place.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BreakerConfig;
use crate::snapshot::StateSnapshot;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen,
}

impl State {
    /// The persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state name that is not `closed`, `open` or `half-open`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown circuit state `{0}`")]
pub struct ParseStateError(String);

impl FromStr for State {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(State::Closed),
            "open" => Ok(State::Open),
            "half-open" => Ok(State::HalfOpen),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// A change from one state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: State,
    pub to: State,
}

impl Transition {
    fn new(from: State, to: State) -> Self {
        Self { from, to }
    }
}

/// Whether a call may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Run the operation.
    Accepted {
        /// The call holds one of the half-open trial slots.
        trial: bool,
    },
    /// Fail fast without running the operation.
    Rejected,
}

/// Result of asking the active state to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub admission: Admission,
    pub transition: Option<Transition>,
}

/// Effect of reporting an outcome to the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Nothing changed.
    Unchanged,
    /// Counters changed, the state did not.
    Updated,
    /// The active state was replaced.
    Transitioned(Transition),
}

/// Normal operation. Counts consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Closed {
    failure_count: u32,
    last_failure_time: Option<u64>,
}

impl Closed {
    fn on_success(&mut self) -> Outcome {
        if self.failure_count == 0 {
            return Outcome::Unchanged;
        }
        self.failure_count = 0;
        Outcome::Updated
    }

    /// Counts the failure and hands back the open state once the threshold is reached.
    fn on_failure(&mut self, now: u64, config: &BreakerConfig) -> Option<Open> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        (self.failure_count >= config.failure_threshold).then(|| Open {
            failure_count: self.failure_count,
            last_failure_time: now,
        })
    }
}

/// Tripped. Rejects everything until the timeout elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Open {
    failure_count: u32,
    last_failure_time: u64,
}

impl Open {
    /// Returns the half-open state to move to once the timeout has been reached.
    fn on_call(&self, now: u64, config: &BreakerConfig) -> Option<HalfOpen> {
        let elapsed = now.saturating_sub(self.last_failure_time);
        (elapsed >= config.timeout_secs()).then(|| HalfOpen {
            failure_count: self.failure_count,
            success_count: 0,
            last_failure_time: self.last_failure_time,
            in_flight: 0,
        })
    }
}

/// Recovering. Admits a bounded number of concurrent trial calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HalfOpen {
    failure_count: u32,
    success_count: u32,
    last_failure_time: u64,
    in_flight: u32,
}

impl HalfOpen {
    fn admit(&mut self, config: &BreakerConfig) -> Admission {
        if self.in_flight >= config.half_open_max_attempts {
            return Admission::Rejected;
        }
        self.in_flight += 1;
        Admission::Accepted { trial: true }
    }

    fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn on_success(&mut self, config: &BreakerConfig) -> Option<Closed> {
        self.failure_count = 0;
        self.success_count = self.success_count.saturating_add(1);

        (self.success_count >= config.success_threshold).then(|| Closed {
            failure_count: 0,
            last_failure_time: Some(self.last_failure_time).filter(|t| *t != 0),
        })
    }

    /// A single trial failure re-opens the circuit.
    fn on_failure(&self, now: u64) -> Open {
        Open {
            failure_count: self.failure_count.saturating_add(1),
            last_failure_time: now,
        }
    }
}

/// The active state object of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CircuitState {
    Closed(Closed),
    Open(Open),
    HalfOpen(HalfOpen),
}

impl CircuitState {
    /// A fresh closed state with zeroed counters.
    pub fn closed() -> Self {
        CircuitState::Closed(Closed {
            failure_count: 0,
            last_failure_time: None,
        })
    }

    /// An open state entered at `now`, keeping the current failure count.
    pub fn forced_open(&self, now: u64) -> Self {
        CircuitState::Open(Open {
            failure_count: self.failure_count(),
            last_failure_time: now,
        })
    }

    /// Rebuilds the state object described by a persisted snapshot.
    ///
    /// Half-open trial slots are not persisted, so a restored half-open state
    /// starts with none in flight.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        match snapshot.state() {
            State::Closed => CircuitState::Closed(Closed {
                failure_count: snapshot.failure_count(),
                last_failure_time: snapshot.last_failure_time(),
            }),
            State::Open => CircuitState::Open(Open {
                failure_count: snapshot.failure_count(),
                last_failure_time: snapshot.last_failure_time().unwrap_or(0),
            }),
            State::HalfOpen => CircuitState::HalfOpen(HalfOpen {
                failure_count: snapshot.failure_count(),
                success_count: snapshot.success_count(),
                last_failure_time: snapshot.last_failure_time().unwrap_or(0),
                in_flight: 0,
            }),
        }
    }

    /// Describes this state as a snapshot for `service_key`.
    pub fn snapshot(&self, service_key: &str) -> StateSnapshot {
        StateSnapshot::new(
            service_key,
            self.name(),
            self.failure_count(),
            self.success_count(),
            self.last_failure_time(),
        )
    }

    pub fn name(&self) -> State {
        match self {
            CircuitState::Closed(_) => State::Closed,
            CircuitState::Open(_) => State::Open,
            CircuitState::HalfOpen(_) => State::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        match self {
            CircuitState::Closed(s) => s.failure_count,
            CircuitState::Open(s) => s.failure_count,
            CircuitState::HalfOpen(s) => s.failure_count,
        }
    }

    pub fn success_count(&self) -> u32 {
        match self {
            CircuitState::HalfOpen(s) => s.success_count,
            _ => 0,
        }
    }

    pub fn last_failure_time(&self) -> Option<u64> {
        match self {
            CircuitState::Closed(s) => s.last_failure_time,
            CircuitState::Open(s) => Some(s.last_failure_time).filter(|t| *t != 0),
            CircuitState::HalfOpen(s) => Some(s.last_failure_time).filter(|t| *t != 0),
        }
    }

    /// Trial calls currently in flight. Always zero outside half-open.
    pub fn in_flight(&self) -> u32 {
        match self {
            CircuitState::HalfOpen(s) => s.in_flight,
            _ => 0,
        }
    }

    /// Decides whether a call may run.
    ///
    /// An open circuit whose timeout has been reached becomes half-open first
    /// and the call is then admitted (or not) by the new half-open state.
    pub fn enter(&mut self, now: u64, config: &BreakerConfig) -> Entry {
        let mut half_open = match self {
            CircuitState::Closed(_) => {
                return Entry {
                    admission: Admission::Accepted { trial: false },
                    transition: None,
                }
            }
            CircuitState::HalfOpen(half_open) => {
                return Entry {
                    admission: half_open.admit(config),
                    transition: None,
                }
            }
            CircuitState::Open(open) => match open.on_call(now, config) {
                Some(half_open) => half_open,
                None => {
                    return Entry {
                        admission: Admission::Rejected,
                        transition: None,
                    }
                }
            },
        };

        let admission = half_open.admit(config);
        *self = CircuitState::HalfOpen(half_open);

        Entry {
            admission,
            transition: Some(Transition::new(State::Open, State::HalfOpen)),
        }
    }

    /// Gives back a half-open trial slot.
    pub fn release_trial(&mut self) {
        if let CircuitState::HalfOpen(half_open) = self {
            half_open.release();
        }
    }

    pub fn record_success(&mut self, config: &BreakerConfig) -> Outcome {
        let next = match self {
            CircuitState::Closed(closed) => return closed.on_success(),
            CircuitState::Open(_) => return Outcome::Unchanged,
            CircuitState::HalfOpen(half_open) => match half_open.on_success(config) {
                Some(closed) => CircuitState::Closed(closed),
                None => return Outcome::Updated,
            },
        };
        Outcome::Transitioned(self.replace(next))
    }

    pub fn record_failure(&mut self, now: u64, config: &BreakerConfig) -> Outcome {
        let next = match self {
            CircuitState::Closed(closed) => match closed.on_failure(now, config) {
                Some(open) => CircuitState::Open(open),
                None => return Outcome::Updated,
            },
            CircuitState::Open(_) => return Outcome::Unchanged,
            CircuitState::HalfOpen(half_open) => CircuitState::Open(half_open.on_failure(now)),
        };
        Outcome::Transitioned(self.replace(next))
    }

    /// Swaps in `next` wholesale.
    pub fn replace(&mut self, next: CircuitState) -> Transition {
        let transition = Transition::new(self.name(), next.name());
        *self = next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(failures: u32, successes: u32, timeout: u64, attempts: u32) -> BreakerConfig {
        BreakerConfig::new(failures, successes, Duration::from_secs(timeout), attempts).unwrap()
    }

    #[test]
    fn state_names_parse_back() {
        for state in [State::Closed, State::Open, State::HalfOpen] {
            assert_eq!(state.as_str().parse::<State>(), Ok(state));
        }
        assert!("ajar".parse::<State>().is_err());
        assert_eq!(serde_json::to_string(&State::HalfOpen).unwrap(), "\"half-open\"");
    }

    #[test]
    fn closed_opens_at_threshold() {
        let cfg = config(3, 1, 10, 1);
        let mut state = CircuitState::closed();

        assert_eq!(state.record_failure(100, &cfg), Outcome::Updated);
        assert_eq!(state.record_failure(101, &cfg), Outcome::Updated);
        assert_eq!(
            state.record_failure(102, &cfg),
            Outcome::Transitioned(Transition::new(State::Closed, State::Open))
        );
        assert_eq!(state.name(), State::Open);
        assert_eq!(state.failure_count(), 3);
        assert_eq!(state.last_failure_time(), Some(102));
    }

    #[test]
    fn closed_success_resets_failures() {
        let cfg = config(3, 1, 10, 1);
        let mut state = CircuitState::closed();

        assert_eq!(state.record_success(&cfg), Outcome::Unchanged);
        state.record_failure(100, &cfg);
        assert_eq!(state.record_success(&cfg), Outcome::Updated);
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.name(), State::Closed);
    }

    #[test]
    fn open_rejects_until_timeout_then_admits_trial() {
        let cfg = config(1, 1, 10, 1);
        let mut state = CircuitState::closed();
        state.record_failure(100, &cfg);

        let entry = state.enter(109, &cfg);
        assert_eq!(entry.admission, Admission::Rejected);
        assert_eq!(entry.transition, None);
        assert_eq!(state.name(), State::Open);

        let entry = state.enter(110, &cfg);
        assert_eq!(entry.admission, Admission::Accepted { trial: true });
        assert_eq!(
            entry.transition,
            Some(Transition::new(State::Open, State::HalfOpen))
        );
        assert_eq!(state.in_flight(), 1);
    }

    #[test]
    fn open_outcomes_are_ignored() {
        let cfg = config(1, 1, 10, 1);
        let mut state = CircuitState::closed();
        state.record_failure(100, &cfg);

        assert_eq!(state.record_failure(105, &cfg), Outcome::Unchanged);
        assert_eq!(state.record_success(&cfg), Outcome::Unchanged);
        assert_eq!(state.last_failure_time(), Some(100));
    }

    #[test]
    fn half_open_limits_concurrent_trials() {
        let cfg = config(1, 5, 0, 2);
        let mut state = CircuitState::closed();
        state.record_failure(100, &cfg);

        assert_eq!(state.enter(100, &cfg).admission, Admission::Accepted { trial: true });
        assert_eq!(state.enter(100, &cfg).admission, Admission::Accepted { trial: true });
        assert_eq!(state.enter(100, &cfg).admission, Admission::Rejected);

        state.release_trial();
        assert_eq!(state.enter(100, &cfg).admission, Admission::Accepted { trial: true });
    }

    #[test]
    fn half_open_failure_reopens_and_discards_successes() {
        let cfg = config(3, 3, 0, 1);
        let snapshot = StateSnapshot::new("svc", State::HalfOpen, 3, 0, Some(50));
        let mut state = CircuitState::from_snapshot(&snapshot);

        assert_eq!(state.record_success(&cfg), Outcome::Updated);
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.success_count(), 1);

        assert_eq!(
            state.record_failure(200, &cfg),
            Outcome::Transitioned(Transition::new(State::HalfOpen, State::Open))
        );
        assert_eq!(state.success_count(), 0);
        assert_eq!(state.failure_count(), 1);
        assert_eq!(state.last_failure_time(), Some(200));
    }

    #[test]
    fn failed_first_trial_keeps_counting_from_the_trip() {
        let cfg = config(3, 3, 0, 1);
        let snapshot = StateSnapshot::new("svc", State::HalfOpen, 3, 0, Some(50));
        let mut state = CircuitState::from_snapshot(&snapshot);

        state.record_failure(200, &cfg);
        assert_eq!(state.name(), State::Open);
        assert_eq!(state.failure_count(), 4);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cfg = config(3, 2, 0, 1);
        let snapshot = StateSnapshot::new("svc", State::HalfOpen, 3, 0, Some(50));
        let mut state = CircuitState::from_snapshot(&snapshot);

        assert_eq!(state.record_success(&cfg), Outcome::Updated);
        assert_eq!(state.success_count(), 1);
        assert_eq!(
            state.record_success(&cfg),
            Outcome::Transitioned(Transition::new(State::HalfOpen, State::Closed))
        );
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.success_count(), 0);
    }

    #[test]
    fn snapshot_round_trips_through_state_object() {
        let snapshot = StateSnapshot::new("svc", State::Open, 7, 0, Some(1_700_000_000));
        assert_eq!(CircuitState::from_snapshot(&snapshot).snapshot("svc"), snapshot);
    }
}
