//! Trips a breaker, "restarts", and shows the state coming back from disk.
//!
//! Run with `RUST_LOG=durable_breaker=debug cargo run --example persistent`.

use durable_breaker::{
    BreakerConfig, BreakerRegistry, FallbackStorage, FileStorage, MemoryStorage, StateRepository,
    StorageAdapter,
};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct UpstreamError;

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("upstream unavailable")
    }
}

impl Error for UpstreamError {}

fn registry(dir: &std::path::Path) -> Result<BreakerRegistry<UpstreamError>, Box<dyn Error>> {
    // Disk first; memory keeps the process going if the disk misbehaves.
    let storage = FallbackStorage::new([
        Arc::new(FileStorage::new(dir)?) as Arc<dyn StorageAdapter>,
        Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>,
    ]);
    let repository = Arc::new(StateRepository::new(Arc::new(storage)));

    let config = BreakerConfig {
        failure_threshold: 2,
        timeout: Duration::from_secs(30),
        ..BreakerConfig::default()
    };
    Ok(BreakerRegistry::new(repository, config)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join("durable-breaker-demo");
    println!("State directory: {}", dir.display());

    {
        let registry = registry(&dir)?;
        registry.get_or_create("payments").force_close()?;

        let breaker = registry.get_or_create("payments");
        for attempt in 1..=3 {
            let result = breaker.call(|| Err::<(), _>(UpstreamError));
            println!("attempt {attempt}: {:?}", result.map_err(|e| e.to_string()));
        }
        registry.get_or_create("search");
        println!("before restart: {}", serde_json::to_string_pretty(&registry.health())?);
    }

    // A fresh registry over the same directory picks up where the last one stopped.
    let registry = registry(&dir)?;
    let breaker = registry.get_or_create("payments");
    println!(
        "after restart: state={} failures={} last_failure={:?}",
        breaker.current_state(),
        breaker.failure_count(),
        breaker.last_failure_time()
    );

    Ok(())
}
