use durable_breaker::{BreakerConfig, BreakerError, CircuitBreaker};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

fn main() {
    let config = BreakerConfig {
        failure_threshold: 3,                // 3 consecutive failures trip the circuit
        success_threshold: 2,                // 2 trial successes close it again
        timeout: Duration::from_secs(2),     // wait 2 seconds before a trial call
        half_open_max_attempts: 1,
    };
    let breaker = CircuitBreaker::<ServiceError>::in_memory("inventory", config)
        .expect("valid configuration");

    breaker.hooks().set_on_state_change(|service, from, to| {
        println!("  [{service}] {from} -> {to}");
    });

    println!("Circuit initial state: {}", breaker.current_state());

    let mut counter = 0u32;

    // The first six calls fail, the rest succeed to demonstrate recovery
    let mut call_service = || -> Result<String, ServiceError> {
        counter += 1;
        if counter <= 6 {
            Err(ServiceError("External service error".to_string()))
        } else {
            Ok(format!("Response #{counter}"))
        }
    };

    for i in 1..=12 {
        println!("\nAttempt {}: ", i);

        match breaker.call(&mut call_service) {
            Ok(result) => println!("Call succeeded with result: {}", result),
            Err(BreakerError::Open { .. }) => {
                println!("Circuit is open, waiting before retry...");
                thread::sleep(Duration::from_millis(700));
            }
            Err(BreakerError::Operation(err)) => {
                println!("Call failed with error: {}", err);
            }
            Err(err) => println!("Other error: {}", err),
        }

        println!(
            "Current state: {}, failures: {}",
            breaker.current_state(),
            breaker.failure_count()
        );
    }

    println!("\nHealth: {:?}", breaker.health());
}
