//! Circuit breakers for fallible async operations
//!
//! # States
//! - Closed: calls run and their outcomes are recorded
//! - Open: calls fail fast without running
//! - Half-Open: the next outcome decides between closed and open
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first observation after open_duration has elapsed
//! Half-Open → Closed: next recorded success
//! Half-Open → Open: next recorded failure
//! any → Closed: reset()
//! ```
//!
//! Each breaker persists its record through a [`StateStore`](crate::storage::StateStore)
//! after every change and reloads it on first use.

pub mod breaker;
pub mod registry;
pub mod types;

pub use breaker::{BreakerDeps, CircuitBreaker, STORAGE_KEY_PREFIX};
pub use registry::BreakerRegistry;
pub use types::{
    BreakerConfig, BreakerRecord, BreakerSnapshot, CircuitBreakerMetrics, CircuitState,
    HalfOpenMode,
};
