use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, the next outcome decides
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// How many concurrent calls a half-open breaker admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfOpenMode {
    /// Every caller proceeds while half-open
    #[default]
    Permissive,
    /// Exactly one in-flight probe; other callers are rejected until it settles
    SingleProbe,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Number of failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time to stay open before admitting a probe, in milliseconds
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,

    /// Half-open admission policy
    #[serde(default)]
    pub half_open_mode: HalfOpenMode,

    /// Optional bound on a single guarded call, in milliseconds
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// Consult the shared throttle before running a call
    #[serde(default)]
    pub use_throttle: bool,

    /// Upper bound on each load/save against the state store, in milliseconds
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_duration_ms() -> u64 {
    60_000
}

fn default_persist_timeout_ms() -> u64 {
    1_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
            half_open_mode: HalfOpenMode::default(),
            call_timeout_ms: None,
            use_throttle: false,
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

/// Durable breaker state, stored as JSON under the breaker's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerRecord {
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(default)]
    pub last_failure_time: Option<u64>,
    #[serde(default)]
    pub last_success_time: Option<u64>,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
        }
    }
}

/// Read-only view of a breaker for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<u64>,
    pub last_success_time: Option<u64>,
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Calls admitted by the breaker
    pub total_requests: u64,
    /// Number of recorded successes
    pub successful_requests: u64,
    /// Number of recorded failures
    pub failed_requests: u64,
    /// Number of calls rejected (circuit open)
    pub rejected_requests: u64,
    /// Number of calls that exceeded the call timeout
    pub timeout_count: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}
