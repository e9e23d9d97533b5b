//! Caller-owned lookup of breakers by service key.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::ConfigError;
use crate::health::HealthReport;
use crate::metrics::MetricSink;
use crate::repository::StateRepository;

/// Breakers for many services sharing one repository, clock and metric sink.
///
/// Breakers are created on first use and live until [`remove`](Self::remove)d.
/// There is no process-wide instance; construct one and pass it around.
pub struct BreakerRegistry<E>
where
    E: std::error::Error + 'static,
{
    repository: Arc<StateRepository>,
    clock: Arc<dyn Clock>,
    default_config: BreakerConfig,
    metric_sink: Option<Arc<dyn MetricSink>>,
    breakers: RwLock<AHashMap<String, CircuitBreaker<E>>>,
}

impl<E> BreakerRegistry<E>
where
    E: std::error::Error + 'static,
{
    /// Creates a registry whose breakers use `default_config` unless told otherwise.
    pub fn new(repository: Arc<StateRepository>, default_config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(repository, default_config, Arc::new(SystemClock))
    }

    /// Creates a registry whose breakers read time from `clock`.
    pub fn with_clock(
        repository: Arc<StateRepository>,
        default_config: BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        default_config.validate()?;
        Ok(Self {
            repository,
            clock,
            default_config,
            metric_sink: None,
            breakers: RwLock::new(AHashMap::new()),
        })
    }

    /// Routes events from every breaker created afterwards to `sink`.
    pub fn with_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = Some(sink);
        self
    }

    /// The configuration used by [`get_or_create`](Self::get_or_create).
    pub fn default_config(&self) -> &BreakerConfig {
        &self.default_config
    }

    /// Returns the breaker for `service`, creating it with the default configuration.
    pub fn get_or_create(&self, service: &str) -> CircuitBreaker<E> {
        if let Some(breaker) = self.get(service) {
            return breaker;
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| self.build(service, self.default_config))
            .clone()
    }

    /// Returns the breaker for `service`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps the configuration it was created with.
    pub fn get_or_create_with(&self, service: &str, config: BreakerConfig) -> Result<CircuitBreaker<E>, ConfigError> {
        if let Some(breaker) = self.get(service) {
            return Ok(breaker);
        }
        config.validate()?;

        let mut breakers = self.breakers.write();
        Ok(breakers
            .entry(service.to_string())
            .or_insert_with(|| self.build(service, config))
            .clone())
    }

    // The config has already been validated.
    fn build(&self, service: &str, config: BreakerConfig) -> CircuitBreaker<E> {
        let breaker = CircuitBreaker::assemble(
            service.to_string(),
            config,
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
        );
        if let Some(sink) = &self.metric_sink {
            breaker.set_metric_sink(Arc::clone(sink));
        }
        tracing::debug!(service, "Registered circuit breaker");
        breaker
    }

    /// The breaker for `service`, if one has been created.
    pub fn get(&self, service: &str) -> Option<CircuitBreaker<E>> {
        self.breakers.read().get(service).cloned()
    }

    /// Forgets the breaker for `service`. Its persisted state is kept.
    pub fn remove(&self, service: &str) -> Option<CircuitBreaker<E>> {
        self.breakers.write().remove(service)
    }

    /// Keys of every registered breaker, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.breakers.read().keys().cloned().collect();
        services.sort_unstable();
        services
    }

    /// Health of every registered breaker, sorted by service.
    pub fn health(&self) -> Vec<HealthReport> {
        let breakers: Vec<CircuitBreaker<E>> = self.breakers.read().values().cloned().collect();
        let mut reports: Vec<HealthReport> = breakers.iter().map(CircuitBreaker::health).collect();
        reports.sort_by(|a, b| a.service.cmp(&b.service));
        reports
    }
}

impl<E> std::fmt::Debug for BreakerRegistry<E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("services", &self.services())
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}
