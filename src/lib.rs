//! Client-side resilience and observability
//!
//! - [`circuit_breaker`]: per-operation failure isolation with persisted state
//! - [`throttle`]: global sustained + burst request limiting
//! - [`logging`]: deduplicating log sink
//! - [`context`]: one object wiring the above together

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod storage;
pub mod throttle;

pub use circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use context::ResilienceContext;
pub use error::{CircuitOpenError, ExecuteError, ResilienceError, Result, ThrottleExceededError};

use crate::config::{LogFormat, TracingConfig};

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence over the configured filter. Safe to call more
/// than once; later calls are ignored.
pub fn init_tracing(config: &TracingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.filter.as_str().into());

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .try_init(),
    };

    if result.is_ok() {
        crate::metrics::register_metrics();
    }
}
