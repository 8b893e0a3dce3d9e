use super::types::{ThrottleConfig, ThrottleDecision, ThrottleState, ThrottleStats};
use crate::clock::{Clock, SystemClock};
use crate::error::ThrottleExceededError;
use crate::logging::DedupLogger;
use crate::metrics;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Global two-tier request throttle
///
/// Every request must pass both the sustained-window quota and the burst
/// limit. The limiter is shared by all callers; labels only feed diagnostics.
#[derive(Debug)]
pub struct ThrottleManager {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
    clock: Arc<dyn Clock>,
    logger: Option<Arc<DedupLogger>>,
}

impl ThrottleManager {
    /// Create a throttle using the system clock
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            max_per_window = config.max_per_window,
            window_ms = config.window_ms,
            burst_limit = config.burst_limit,
            burst_window_ms = config.burst_window_ms,
            "Creating request throttle"
        );

        let state = ThrottleState {
            window_start: clock.now_millis(),
            ..Default::default()
        };

        Self {
            config,
            state: Mutex::new(state),
            clock,
            logger: None,
        }
    }

    /// Report denials through a deduplicating logger
    pub fn with_logger(mut self, logger: Arc<DedupLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Whether a request may proceed; an allowed request is counted
    pub fn should_allow_request(&self, label: &str) -> bool {
        self.evaluate(label).is_allowed()
    }

    /// Like [`should_allow_request`](Self::should_allow_request) but as a `Result`
    pub fn check(&self, label: &str) -> Result<(), ThrottleExceededError> {
        if self.should_allow_request(label) {
            Ok(())
        } else {
            Err(ThrottleExceededError {
                label: label.to_string(),
            })
        }
    }

    /// Run both limiters and report which one, if any, refused the request
    pub fn evaluate(&self, label: &str) -> ThrottleDecision {
        if !self.config.enabled {
            return ThrottleDecision::Allowed;
        }

        let now = self.clock.now_millis();
        let decision = {
            let mut state = self.lock_state();

            if now.saturating_sub(state.window_start) > self.config.window_ms {
                state.window_count = 0;
                state.window_start = now;
                state.burst_timestamps.clear();
            }

            if state.window_count >= self.config.max_per_window {
                state.blocked_count += 1;
                ThrottleDecision::WindowExceeded
            } else {
                let burst_window = self.config.burst_window_ms;
                while let Some(&oldest) = state.burst_timestamps.front() {
                    if now.saturating_sub(oldest) < burst_window {
                        break;
                    }
                    state.burst_timestamps.pop_front();
                }

                if state.burst_timestamps.len() >= self.config.burst_limit as usize {
                    state.blocked_count += 1;
                    ThrottleDecision::BurstExceeded
                } else {
                    state.window_count += 1;
                    state.burst_timestamps.push_back(now);
                    ThrottleDecision::Allowed
                }
            }
        };

        match decision {
            ThrottleDecision::Allowed => {
                debug!(label = label, "Throttle allowed request");
            }
            ThrottleDecision::WindowExceeded => {
                metrics::record_throttle_denied("window");
                self.report_denial(label, "window");
            }
            ThrottleDecision::BurstExceeded => {
                metrics::record_throttle_denied("burst");
                self.report_denial(label, "burst");
            }
        }

        decision
    }

    pub fn stats(&self) -> ThrottleStats {
        let now = self.clock.now_millis();
        let state = self.lock_state();
        ThrottleStats {
            count: state.window_count,
            last_reset: state.window_start,
            blocked: state.blocked_count,
            burst_count: state
                .burst_timestamps
                .iter()
                .filter(|&&t| now.saturating_sub(t) < self.config.burst_window_ms)
                .count(),
            time_until_reset: state
                .window_start
                .saturating_add(self.config.window_ms)
                .saturating_sub(now),
        }
    }

    /// Zero every counter and start a fresh window
    pub fn reset(&self) {
        let now = self.clock.now_millis();
        let mut state = self.lock_state();
        *state = ThrottleState {
            window_start: now,
            ..Default::default()
        };
        info!("Request throttle reset");
    }

    fn lock_state(&self) -> MutexGuard<'_, ThrottleState> {
        // Counters stay usable even if a holder panicked
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report_denial(&self, label: &str, limiter: &str) {
        if let Some(logger) = &self.logger {
            logger.warn(
                "Request throttled",
                Some(&json!({ "label": label, "limiter": limiter })),
            );
        } else {
            debug!(label = label, limiter = limiter, "Request throttled");
        }
    }
}
