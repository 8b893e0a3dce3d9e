use std::time::Duration;
use thiserror::Error;

/// Result type for resilience-layer operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors raised by configuration, persistence and sinks
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Log sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ResilienceError {
    fn from(e: serde_json::Error) -> Self {
        ResilienceError::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for ResilienceError {
    fn from(e: redis::RedisError) -> Self {
        ResilienceError::Storage(e.to_string())
    }
}

/// The breaker refused the call before the operation was invoked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit '{name}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub name: String,
    /// Time left until the breaker will admit a probe call
    pub retry_after: Duration,
}

/// The throttle refused the request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Request throttled: {label}")]
pub struct ThrottleExceededError {
    pub label: String,
}

/// Outcome of a guarded call that did not produce a value
///
/// `Operation` carries the wrapped operation's own error untouched, so callers
/// can always tell a local rejection apart from a downstream failure.
#[derive(Error, Debug)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    Throttled(#[from] ThrottleExceededError),

    #[error("Operation on circuit '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("{0}")]
    Operation(E),
}

impl<E> ExecuteError<E> {
    /// Whether the call was refused locally without running the operation
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecuteError::CircuitOpen(_) | ExecuteError::Throttled(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecuteError::CircuitOpen(_))
    }

    /// Borrow the operation's own error, if that is what failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation's own error, if that is what failed
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
