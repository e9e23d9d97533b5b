//! Time sources for the circuit breaker.
//!
//! All persisted timestamps are epoch seconds, so the breaker only ever asks a
//! [`Clock`] for "now". Tests swap in a [`ManualClock`] to step through open
//! timeouts without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Supplies the current time and a way to wait.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1_000
    }

    /// Blocks the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock instead of blocking, which keeps time-dependent
/// tests deterministic.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `secs` seconds past the epoch.
    pub fn new(secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(secs.saturating_mul(1_000)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as u64, Ordering::AcqRel);
    }

    /// Sets the clock to an absolute number of epoch seconds.
    pub fn set_secs(&self, secs: u64) {
        self.millis
            .store(secs.saturating_mul(1_000), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
