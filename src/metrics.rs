//! Metric events emitted by the circuit breaker.
//!
//! The breaker reports each outcome exactly once to its [`MetricSink`]. It
//! keeps no aggregates of its own; counting, rates and export belong to the
//! sink.

use std::time::Duration;

use crate::state::State;

/// Trait for metrics sinks that can receive circuit breaker events.
pub trait MetricSink: Send + Sync + 'static {
    /// The operation ran and succeeded.
    fn record_success(&self, service: &str, duration: Duration);

    /// The operation ran and failed.
    fn record_failure(&self, service: &str, duration: Duration);

    /// The call was rejected without running, while in `state`.
    fn record_rejection(&self, service: &str, state: State);

    /// A fallback produced the result of a failed or rejected call.
    fn record_fallback(&self, service: &str);

    /// The circuit moved from one state to another.
    fn record_state_transition(&self, service: &str, from: State, to: State);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_success(&self, _service: &str, _duration: Duration) {}
    fn record_failure(&self, _service: &str, _duration: Duration) {}
    fn record_rejection(&self, _service: &str, _state: State) {}
    fn record_fallback(&self, _service: &str) {}
    fn record_state_transition(&self, _service: &str, _from: State, _to: State) {}
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetricSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use std::time::Duration;

    use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;

    use super::MetricSink;
    use crate::state::State;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
    enum CallOutcome {
        Success,
        Failure,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
    enum StateLabel {
        Closed,
        Open,
        HalfOpen,
    }

    impl From<State> for StateLabel {
        fn from(state: State) -> Self {
            match state {
                State::Closed => StateLabel::Closed,
                State::Open => StateLabel::Open,
                State::HalfOpen => StateLabel::HalfOpen,
            }
        }
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CallLabels {
        service: String,
        outcome: CallOutcome,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct ServiceLabels {
        service: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct RejectionLabels {
        service: String,
        state: StateLabel,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        service: String,
        from: StateLabel,
        to: StateLabel,
    }

    fn duration_histogram() -> Histogram {
        Histogram::new(exponential_buckets(0.001, 2.0, 14))
    }

    /// Exports breaker events as Prometheus metrics.
    #[derive(Debug, Clone)]
    pub struct PrometheusMetricSink {
        calls: Family<CallLabels, Counter>,
        durations: Family<CallLabels, Histogram, fn() -> Histogram>,
        rejections: Family<RejectionLabels, Counter>,
        fallbacks: Family<ServiceLabels, Counter>,
        transitions: Family<TransitionLabels, Counter>,
    }

    impl PrometheusMetricSink {
        /// Creates the metrics and registers them under `circuit_breaker_*`.
        pub fn register(registry: &mut Registry) -> Self {
            let sink = Self {
                calls: Family::default(),
                durations: Family::new_with_constructor(duration_histogram),
                rejections: Family::default(),
                fallbacks: Family::default(),
                transitions: Family::default(),
            };

            let registry = registry.sub_registry_with_prefix("circuit_breaker");
            registry.register("calls", "Calls that ran", sink.calls.clone());
            registry.register(
                "call_duration_seconds",
                "Duration of calls that ran",
                sink.durations.clone(),
            );
            registry.register(
                "rejections",
                "Calls rejected without running",
                sink.rejections.clone(),
            );
            registry.register(
                "fallbacks",
                "Calls answered by a fallback",
                sink.fallbacks.clone(),
            );
            registry.register(
                "transitions",
                "State transitions",
                sink.transitions.clone(),
            );

            sink
        }

        fn record_call(&self, service: &str, outcome: CallOutcome, duration: Duration) {
            let labels = CallLabels {
                service: service.to_string(),
                outcome,
            };
            self.durations
                .get_or_create(&labels)
                .observe(duration.as_secs_f64());
            self.calls.get_or_create(&labels).inc();
        }
    }

    impl MetricSink for PrometheusMetricSink {
        fn record_success(&self, service: &str, duration: Duration) {
            self.record_call(service, CallOutcome::Success, duration);
        }

        fn record_failure(&self, service: &str, duration: Duration) {
            self.record_call(service, CallOutcome::Failure, duration);
        }

        fn record_rejection(&self, service: &str, state: State) {
            self.rejections
                .get_or_create(&RejectionLabels {
                    service: service.to_string(),
                    state: state.into(),
                })
                .inc();
        }

        fn record_fallback(&self, service: &str) {
            self.fallbacks
                .get_or_create(&ServiceLabels {
                    service: service.to_string(),
                })
                .inc();
        }

        fn record_state_transition(&self, service: &str, from: State, to: State) {
            self.transitions
                .get_or_create(&TransitionLabels {
                    service: service.to_string(),
                    from: from.into(),
                    to: to.into(),
                })
                .inc();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use prometheus_client::encoding::text::encode;

        #[test]
        fn exports_labelled_counters() {
            let mut registry = Registry::default();
            let sink = PrometheusMetricSink::register(&mut registry);

            sink.record_success("db", Duration::from_millis(5));
            sink.record_rejection("db", State::Open);
            sink.record_state_transition("db", State::Closed, State::Open);

            let mut out = String::new();
            encode(&mut out, &registry).unwrap();

            assert!(out.contains(r#"circuit_breaker_calls_total{service="db",outcome="Success"} 1"#));
            assert!(out.contains(r#"circuit_breaker_rejections_total{service="db",state="Open"} 1"#));
            assert!(out.contains(
                r#"circuit_breaker_transitions_total{service="db",from="Closed",to="Open"} 1"#
            ));
        }
    }
}
