use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Enable throttling; when disabled every request is allowed
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum requests per sustained window
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    /// Sustained window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum requests per burst window
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,

    /// Burst window length in milliseconds
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_per_window() -> u32 {
    60
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_burst_limit() -> u32 {
    10
}

fn default_burst_window_ms() -> u64 {
    5_000
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_per_window: default_max_per_window(),
            window_ms: default_window_ms(),
            burst_limit: default_burst_limit(),
            burst_window_ms: default_burst_window_ms(),
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }
}

/// Mutable throttle counters
#[derive(Debug, Default)]
pub(crate) struct ThrottleState {
    pub window_count: u32,
    pub window_start: u64,
    pub blocked_count: u64,
    pub burst_timestamps: VecDeque<u64>,
}

/// Which limiter refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    /// The sustained window quota is used up
    WindowExceeded,
    /// Too many requests inside the burst window
    BurstExceeded,
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }
}

/// Throttle statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    /// Requests admitted in the current sustained window
    pub count: u32,
    /// Start of the current sustained window, epoch milliseconds
    pub last_reset: u64,
    /// Requests denied since the last reset
    pub blocked: u64,
    /// Requests currently counted in the burst window
    pub burst_count: usize,
    /// Milliseconds until the sustained window resets
    pub time_until_reset: u64,
}
