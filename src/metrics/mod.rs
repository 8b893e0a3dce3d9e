//! Metric helpers for breakers, the throttle and the logger
//!
//! Everything goes through the `metrics` facade; without an installed recorder
//! the calls are no-ops, so the library never installs one itself.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use tracing::debug;

use crate::circuit_breaker::CircuitState;

/// Register descriptions for every metric this crate emits
pub fn register_metrics() {
    describe_gauge!(
        "resilience_circuit_breaker_state",
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!(
        "resilience_circuit_breaker_transitions_total",
        "Total number of circuit breaker state transitions"
    );
    describe_counter!(
        "resilience_circuit_breaker_rejections_total",
        "Total number of calls rejected by an open circuit"
    );
    describe_counter!(
        "resilience_throttle_denied_total",
        "Total number of requests denied by the throttle"
    );
    describe_counter!(
        "resilience_log_suppressed_total",
        "Total number of duplicate log lines suppressed"
    );

    debug!("All metrics registered with descriptions");
}

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    }
}

/// Record a breaker moving between states
pub fn record_circuit_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("breaker", name.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!("resilience_circuit_breaker_transitions_total", &labels).increment(1);

    let labels = [("breaker", name.to_string())];
    gauge!("resilience_circuit_breaker_state", &labels).set(state_value(to));
}

/// Record a call refused by an open breaker
pub fn record_circuit_breaker_rejection(name: &str) {
    let labels = [("breaker", name.to_string())];
    counter!("resilience_circuit_breaker_rejections_total", &labels).increment(1);
}

/// Record a request denied by the throttle
pub fn record_throttle_denied(limiter: &'static str) {
    let labels = [("limiter", limiter.to_string())];
    counter!("resilience_throttle_denied_total", &labels).increment(1);
}

/// Record a suppressed duplicate log line
pub fn record_log_suppressed(level: &str) {
    let labels = [("level", level.to_string())];
    counter!("resilience_log_suppressed_total", &labels).increment(1);
}
