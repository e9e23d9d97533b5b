use criterion::{black_box, criterion_group, criterion_main, Criterion};
use durable_breaker::{BreakerConfig, CircuitBreaker, FileStorage, StateRepository};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct BenchError(String);

impl BenchError {
    fn new(msg: &str) -> Self {
        BenchError(msg.to_string())
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Benchmark error: {}", self.0)
    }
}

impl Error for BenchError {}

fn successful_operation() -> Result<(), BenchError> {
    Ok(())
}

fn failing_operation() -> Result<(), BenchError> {
    Err(BenchError::new("Simulated failure"))
}

fn config(failure_threshold: u32) -> BreakerConfig {
    BreakerConfig {
        failure_threshold,
        timeout: Duration::from_secs(30),
        ..BreakerConfig::default()
    }
}

fn bench_circuit_breaker_closed(c: &mut Criterion) {
    let breaker = CircuitBreaker::<BenchError>::in_memory("bench", config(5)).unwrap();

    c.bench_function("circuit_breaker_closed_success", |b| {
        b.iter(|| black_box(breaker.call(successful_operation)));
    });
}

fn bench_circuit_breaker_rejection(c: &mut Criterion) {
    let breaker = CircuitBreaker::<BenchError>::in_memory("bench", config(5)).unwrap();
    breaker.force_open().unwrap();

    c.bench_function("circuit_breaker_open_rejection", |b| {
        b.iter(|| black_box(breaker.call(successful_operation)));
    });
}

fn bench_circuit_breaker_transition(c: &mut Criterion) {
    let breaker = CircuitBreaker::<BenchError>::in_memory("bench", config(5)).unwrap();

    c.bench_function("circuit_breaker_transition", |b| {
        b.iter_custom(|iters| {
            let start = std::time::Instant::now();

            for _ in 0..iters {
                // Force closed to ensure consistent starting point
                let _ = breaker.force_close();

                // Make 5 failing calls to trip the breaker
                for _ in 0..5 {
                    let _ = black_box(breaker.call(failing_operation));
                }

                // One open-circuit rejection
                let _ = black_box(breaker.call(successful_operation));
            }

            start.elapsed()
        });
    });
}

fn bench_file_backed_transition(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
    let repository = Arc::new(StateRepository::new(storage));
    let breaker = CircuitBreaker::<BenchError>::new("bench", config(1), repository).unwrap();

    c.bench_function("file_backed_open_close", |b| {
        b.iter(|| {
            let _ = black_box(breaker.call(failing_operation));
            let _ = black_box(breaker.force_close());
        });
    });
}

fn bench_circuit_breaker_concurrent(c: &mut Criterion) {
    use std::sync::Barrier;
    use std::thread;

    // High threshold to avoid tripping
    let breaker = CircuitBreaker::<BenchError>::in_memory("bench", config(100)).unwrap();

    const THREAD_COUNT: usize = 4;
    const ITERATIONS_PER_THREAD: usize = 1000;

    c.bench_function("circuit_breaker_concurrent", |b| {
        b.iter(|| {
            let barrier = Arc::new(Barrier::new(THREAD_COUNT + 1));
            let mut handles = Vec::with_capacity(THREAD_COUNT);

            for _ in 0..THREAD_COUNT {
                let thread_breaker = breaker.clone();
                let thread_barrier = Arc::clone(&barrier);

                handles.push(thread::spawn(move || {
                    thread_barrier.wait();
                    for _ in 0..ITERATIONS_PER_THREAD {
                        let _ = black_box(thread_breaker.call(successful_operation));
                    }
                }));
            }

            // Start all threads simultaneously
            barrier.wait();

            // Wait for all threads to complete
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_circuit_breaker_closed,
    bench_circuit_breaker_rejection,
    bench_circuit_breaker_transition,
    bench_file_backed_transition,
    bench_circuit_breaker_concurrent
);
criterion_main!(benches);
