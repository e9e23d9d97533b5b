//! Core circuit breaker implementation.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{BreakerError, BreakerResult, ConfigError, StorageError};
use crate::health::HealthReport;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::repository::StateRepository;
use crate::snapshot::StateSnapshot;
use crate::state::{Admission, CircuitState, Outcome, State, Transition};
use crate::storage::{MemoryStorage, StorageAdapter};

/// The active state plus the counters that order its changes.
struct Core {
    state: CircuitState,
    /// Bumped on every transition. Outcomes admitted under an older epoch are stale.
    epoch: u64,
    /// Bumped on every mutation. Orders snapshot writes.
    revision: u64,
}

/// A mutation that still has to be announced and persisted.
struct Change {
    snapshot: StateSnapshot,
    revision: u64,
    transition: Option<Transition>,
}

impl Core {
    fn commit(&mut self, service_key: &str, transition: Option<Transition>) -> Change {
        self.revision += 1;
        if transition.is_some() {
            self.epoch += 1;
        }
        Change {
            snapshot: self.state.snapshot(service_key),
            revision: self.revision,
            transition,
        }
    }
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner {
    service_key: String,
    config: BreakerConfig,
    repository: Arc<StateRepository>,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
    /// Highest revision handed to the repository.
    persisted: Mutex<u64>,
    metric_sink: RwLock<Arc<dyn MetricSink>>,
    hooks: HookRegistry,
}

/// Admission to run one operation.
///
/// Dropping a permit that holds a half-open trial slot gives the slot back,
/// whether the call finished, panicked, or was cancelled.
struct Permit<'a> {
    inner: &'a BreakerInner,
    epoch: u64,
    trial: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.trial {
            return;
        }
        let mut core = self.inner.core.lock();
        if core.epoch == self.epoch {
            core.state.release_trial();
        }
    }
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// State is loaded from a [`StateRepository`] on construction and saved back
/// after every change, so it survives restarts and can be shared with other
/// processes that use the same storage.
pub struct CircuitBreaker<E>
where
    E: std::error::Error + 'static,
{
    inner: Arc<BreakerInner>,
    _error_type: PhantomData<fn() -> E>,
}

impl<E> CircuitBreaker<E>
where
    E: std::error::Error + 'static,
{
    /// Creates a breaker for `service_key`, restoring its persisted state.
    pub fn new(
        service_key: impl Into<String>,
        config: BreakerConfig,
        repository: Arc<StateRepository>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(service_key, config, repository, Arc::new(SystemClock))
    }

    /// Creates a breaker that reads time from `clock`.
    pub fn with_clock(
        service_key: impl Into<String>,
        config: BreakerConfig,
        repository: Arc<StateRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(service_key.into(), config, repository, clock))
    }

    /// Builds a breaker from an already validated config.
    pub(crate) fn assemble(
        service_key: String,
        config: BreakerConfig,
        repository: Arc<StateRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshot = repository.load(&service_key);
        tracing::debug!(
            service = %service_key,
            state = %snapshot.state(),
            failure_count = snapshot.failure_count(),
            "Circuit breaker initialised"
        );

        let inner = BreakerInner {
            service_key,
            config,
            repository,
            clock,
            core: Mutex::new(Core {
                state: CircuitState::from_snapshot(&snapshot),
                epoch: 0,
                revision: 0,
            }),
            persisted: Mutex::new(0),
            metric_sink: RwLock::new(Arc::new(NullMetricSink)),
            hooks: HookRegistry::new(),
        };

        Self {
            inner: Arc::new(inner),
            _error_type: PhantomData,
        }
    }

    /// Creates a breaker whose state lives only in this process.
    pub fn in_memory(service_key: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        Self::new(service_key, config, Arc::new(StateRepository::new(storage)))
    }

    /// The key identifying the protected service.
    pub fn service_key(&self) -> &str {
        &self.inner.service_key
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Gets the current state of the circuit breaker.
    pub fn current_state(&self) -> State {
        self.inner.core.lock().state.name()
    }

    /// Consecutive failures since the last reset.
    pub fn failure_count(&self) -> u32 {
        self.inner.core.lock().state.failure_count()
    }

    /// Consecutive successes while half-open.
    pub fn success_count(&self) -> u32 {
        self.inner.core.lock().state.success_count()
    }

    /// Epoch seconds of the last recorded failure.
    pub fn last_failure_time(&self) -> Option<u64> {
        self.inner.core.lock().state.last_failure_time()
    }

    /// How long the circuit stays open before admitting trial calls.
    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    /// The clock the breaker reads time from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// The repository state is persisted through.
    pub fn repository(&self) -> &Arc<StateRepository> {
        &self.inner.repository
    }

    /// The current state as a snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.core.lock().state.snapshot(&self.inner.service_key)
    }

    /// Status summary for dashboards.
    pub fn health(&self) -> HealthReport {
        let snapshot = self.snapshot();
        HealthReport {
            service: self.inner.service_key.clone(),
            status: snapshot.state().into(),
            state: snapshot.state(),
            failure_count: snapshot.failure_count(),
            success_count: snapshot.success_count(),
            failure_threshold: self.inner.config.failure_threshold,
            success_threshold: self.inner.config.success_threshold,
            last_failure_time: snapshot.last_failure_time(),
        }
    }

    /// Hooks fired by this breaker.
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// Routes this breaker's metric events to `sink`.
    pub fn set_metric_sink(&self, sink: Arc<dyn MetricSink>) {
        *self.inner.metric_sink.write() = sink;
    }

    fn sink(&self) -> Arc<dyn MetricSink> {
        Arc::clone(&self.inner.metric_sink.read())
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// Rejected calls never run `f`. If `f` fails, the failure is counted and
    /// handed back as [`BreakerError::Operation`].
    pub fn call<F, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.pre_call()?;

        let start = Instant::now();
        let result = f();
        let duration = start.elapsed();

        self.post_call(permit, result, duration)
    }

    /// Like [`call`](Self::call), but any error, rejection included, is
    /// replaced by the value `fallback` computes from it.
    pub fn call_with_fallback<F, G, T>(&self, f: F, fallback: G) -> T
    where
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(BreakerError<E>) -> T,
    {
        match self.call(f) {
            Ok(value) => value,
            Err(err) => self.fall_back(err, fallback),
        }
    }

    fn fall_back<G, T>(&self, err: BreakerError<E>, fallback: G) -> T
    where
        G: FnOnce(BreakerError<E>) -> T,
    {
        tracing::debug!(service = %self.inner.service_key, error = %err, "Using fallback");
        self.sink().record_fallback(&self.inner.service_key);
        self.inner.hooks.execute_fallback_hook(&self.inner.service_key);
        fallback(err)
    }

    /// Checks if a call is allowed based on the current state.
    fn pre_call(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let now = self.inner.clock.now_secs();

        let (admitted, change) = {
            let mut core = self.inner.core.lock();
            let entry = core.state.enter(now, &self.inner.config);
            let change = entry
                .transition
                .map(|t| core.commit(&self.inner.service_key, Some(t)));

            let admitted = match entry.admission {
                Admission::Accepted { trial } => Ok(Permit {
                    inner: &*self.inner,
                    epoch: core.epoch,
                    trial,
                }),
                Admission::Rejected => Err((core.state.name(), core.state.failure_count())),
            };
            (admitted, change)
        };

        // Persist the transition before the operation runs. A failed write
        // drops the permit, which frees its trial slot.
        if let Some(change) = change {
            self.publish(change).map_err(BreakerError::Storage)?;
        }

        match admitted {
            Ok(permit) => {
                tracing::debug!(service = %self.inner.service_key, trial = permit.trial, "Call admitted");
                Ok(permit)
            }
            Err((state, failure_count)) => {
                tracing::debug!(service = %self.inner.service_key, %state, "Call rejected");
                self.sink().record_rejection(&self.inner.service_key, state);
                self.inner.hooks.execute_rejected_hook(&self.inner.service_key);
                Err(BreakerError::Open {
                    service: self.inner.service_key.clone(),
                    state,
                    failure_count,
                })
            }
        }
    }

    /// Reports the result of a call and persists any resulting change.
    fn post_call<T>(
        &self,
        permit: Permit<'_>,
        result: Result<T, E>,
        duration: Duration,
    ) -> BreakerResult<T, E> {
        let now = self.inner.clock.now_secs();
        let service = self.inner.service_key.as_str();

        let change = {
            let mut core = self.inner.core.lock();
            if core.epoch != permit.epoch {
                tracing::debug!(service, "Ignoring outcome admitted by a previous state");
                None
            } else {
                let outcome = match &result {
                    Ok(_) => core.state.record_success(&self.inner.config),
                    Err(_) => core.state.record_failure(now, &self.inner.config),
                };
                match outcome {
                    Outcome::Unchanged => None,
                    Outcome::Updated => Some(core.commit(service, None)),
                    Outcome::Transitioned(t) => Some(core.commit(service, Some(t))),
                }
            }
        };
        // Released only after the state lock: the permit takes it again.
        drop(permit);

        let sink = self.sink();
        match result {
            Ok(value) => {
                sink.record_success(service, duration);
                self.inner.hooks.execute_success_hook(service);
                if let Some(change) = change {
                    self.publish(change).map_err(BreakerError::Storage)?;
                }
                Ok(value)
            }
            Err(err) => {
                sink.record_failure(service, duration);
                self.inner.hooks.execute_failure_hook(service);
                if let Some(change) = change {
                    if let Err(storage_err) = self.publish(change) {
                        tracing::error!(
                            service,
                            error = %storage_err,
                            "Failed to persist circuit state after a failed call"
                        );
                    }
                }
                Err(BreakerError::Operation(err))
            }
        }
    }

    /// Announces a transition, if any, then persists the snapshot.
    fn publish(&self, change: Change) -> Result<(), StorageError> {
        if let Some(Transition { from, to }) = change.transition {
            let service = self.inner.service_key.as_str();
            tracing::info!(service, %from, %to, "Circuit state changed");
            self.sink().record_state_transition(service, from, to);
            self.inner.hooks.execute_state_transition_hook(service, from, to);
        }
        self.persist(&change.snapshot, change.revision)
    }

    /// Writes a snapshot unless a newer revision has already been written.
    fn persist(&self, snapshot: &StateSnapshot, revision: u64) -> Result<(), StorageError> {
        let mut persisted = self.inner.persisted.lock();
        if *persisted >= revision {
            return Ok(());
        }
        *persisted = revision;
        self.inner.repository.save(snapshot)
    }

    /// Forces the circuit breaker to the open state.
    ///
    /// Returns `Ok(false)` if it was already open.
    pub fn force_open(&self) -> Result<bool, StorageError> {
        let now = self.inner.clock.now_secs();
        self.force(|state| {
            (state.name() != State::Open).then(|| state.forced_open(now))
        })
    }

    /// Forces the circuit breaker to the closed state, zeroing its counters.
    ///
    /// Returns `Ok(false)` if it was already closed.
    pub fn force_close(&self) -> Result<bool, StorageError> {
        self.force(|state| (state.name() != State::Closed).then(CircuitState::closed))
    }

    fn force<F>(&self, next: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&CircuitState) -> Option<CircuitState>,
    {
        let change = {
            let mut core = self.inner.core.lock();
            let Some(next) = next(&core.state) else {
                return Ok(false);
            };
            let transition = core.state.replace(next);
            core.commit(&self.inner.service_key, Some(transition))
        };

        self.publish(change)?;
        Ok(true)
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<E> Clone for CircuitBreaker<E>
where
    E: std::error::Error + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _error_type: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for CircuitBreaker<E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.inner.service_key)
            .field("state", &self.current_state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<E> CircuitBreaker<E>
where
    E: std::error::Error + 'static,
{
    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// Dropping the returned future before it completes releases any
    /// half-open trial slot it held; the outcome is not recorded.
    pub async fn call_async<F, Fut, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.pre_call()?;

        let start = Instant::now();
        let result = f().await;
        let duration = start.elapsed();

        self.post_call(permit, result, duration)
    }

    /// Async counterpart of [`call_with_fallback`](Self::call_with_fallback).
    pub async fn call_with_fallback_async<F, Fut, G, T>(&self, f: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> T,
    {
        match self.call_async(f).await {
            Ok(value) => value,
            Err(err) => self.fall_back(err, fallback),
        }
    }
}
