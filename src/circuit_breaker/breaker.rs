use super::types::{
    BreakerConfig, BreakerRecord, BreakerSnapshot, CircuitBreakerMetrics, CircuitState,
    HalfOpenMode,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{CircuitOpenError, ExecuteError, ResilienceError, ThrottleExceededError};
use crate::logging::{DedupLogger, LoggerConfig};
use crate::metrics;
use crate::storage::StateStore;
use crate::throttle::ThrottleManager;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Prefix of the key each breaker persists its record under
pub const STORAGE_KEY_PREFIX: &str = "circuit_breaker:";

/// Collaborators shared by every breaker of a registry
#[derive(Debug, Clone)]
pub struct BreakerDeps {
    pub store: Option<Arc<dyn StateStore>>,
    pub throttle: Option<Arc<ThrottleManager>>,
    pub logger: Arc<DedupLogger>,
    pub clock: Arc<dyn Clock>,
}

impl Default for BreakerDeps {
    fn default() -> Self {
        Self {
            store: None,
            throttle: None,
            logger: Arc::new(DedupLogger::new(LoggerConfig::default())),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Circuit breaker guarding one named operation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Breaker name, also the persistence key suffix
    name: String,
    /// Configuration, fixed at creation
    config: BreakerConfig,
    /// Bookkeeping; held only for check/record, never across the guarded call
    state: Mutex<State>,
    /// Claim id of the running single-probe call, 0 when the slot is free
    probe_owner: AtomicU64,
    /// Source of probe claim ids
    probe_claims: AtomicU64,
    deps: BreakerDeps,
}

#[derive(Debug, Default)]
struct State {
    record: BreakerRecord,
    /// Whether the stored record has been consulted yet
    hydrated: bool,
    metrics: CircuitBreakerMetrics,
}

/// Frees the probe slot when a probe call ends, including by cancellation
///
/// The slot is only freed if it still holds this probe's claim; a claim
/// superseded by `reset` and a later probe is left alone.
struct ProbeSlot<'a> {
    claim: Option<(&'a AtomicU64, u64)>,
}

impl ProbeSlot<'_> {
    fn unclaimed() -> Self {
        Self { claim: None }
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if let Some((owner, id)) = self.claim {
            let _ = owner.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

impl CircuitBreaker {
    /// Create an in-memory breaker with default collaborators
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_deps(name, config, BreakerDeps::default())
    }

    /// Create a breaker with explicit collaborators
    ///
    /// The stored record, if any, is loaded on the first observation.
    pub fn with_deps(name: impl Into<String>, config: BreakerConfig, deps: BreakerDeps) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration_ms,
            half_open_mode = ?config.half_open_mode,
            "Creating circuit breaker"
        );

        Self {
            name,
            config,
            state: Mutex::new(State::default()),
            probe_owner: AtomicU64::new(0),
            probe_claims: AtomicU64::new(0),
            deps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn storage_key(&self) -> String {
        format!("{}{}", STORAGE_KEY_PREFIX, self.name)
    }

    /// Whether a call would currently be admitted
    ///
    /// Moves an expired open circuit to half-open. Does not reserve the
    /// single-probe slot; [`execute`](Self::execute) does that.
    pub async fn can_execute(&self) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_hydrated(&mut state).await;
        self.advance_if_cooled(&mut state).await;

        match state.record.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                self.config.half_open_mode == HalfOpenMode::Permissive
                    || self.probe_owner.load(Ordering::SeqCst) == 0
            }
        }
    }

    /// Run `operation` if the circuit admits it, recording the outcome
    ///
    /// A rejected call never invokes `operation`. The operation's own error is
    /// returned unchanged inside [`ExecuteError::Operation`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _probe = match self.admit().await {
            Ok(slot) => slot,
            Err(rejection) => {
                if rejection.is_circuit_open() {
                    self.deps.logger.warn(
                        "Circuit open, call rejected",
                        Some(&json!({ "breaker": self.name })),
                    );
                }
                return Err(rejection);
            }
        };

        let outcome = match self.config.call_timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.record_timeout().await;
                    return Err(ExecuteError::Timeout {
                        name: self.name.clone(),
                        after: limit,
                    });
                }
            },
            None => operation().await,
        };

        match outcome {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(ExecuteError::Operation(e))
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let now = self.deps.clock.now_millis();
        let mut state = self.state.lock().await;
        self.ensure_hydrated(&mut state).await;

        state.metrics.successful_requests += 1;
        state.record.last_success_time = Some(now);

        match state.record.state {
            CircuitState::Closed => {
                state.record.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Closed);
            }
            CircuitState::Open => {
                // A call admitted before the circuit tripped; it does not close it
                debug!(breaker = %self.name, "Recording success in open state");
            }
        }

        self.persist(&state).await;
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let now = self.deps.clock.now_millis();
        let mut state = self.state.lock().await;
        self.ensure_hydrated(&mut state).await;

        state.metrics.failed_requests += 1;
        state.record.failure_count = state.record.failure_count.saturating_add(1);
        state.record.last_failure_time = Some(now);

        match state.record.state {
            CircuitState::Closed => {
                debug!(
                    breaker = %self.name,
                    failure_count = state.record.failure_count,
                    threshold = self.config.failure_threshold,
                    "Call failed in closed state"
                );
                if state.record.failure_count >= self.config.failure_threshold.max(1) {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Recording failure in open state");
            }
        }

        self.persist(&state).await;
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> BreakerSnapshot {
        let mut state = self.state.lock().await;
        self.ensure_hydrated(&mut state).await;
        self.snapshot(&state)
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.lock().await.metrics.clone()
    }

    /// Force the circuit closed with zeroed counters
    pub async fn reset(&self) {
        let now = self.deps.clock.now_millis();
        let mut state = self.state.lock().await;
        // The reset supersedes whatever is stored
        state.hydrated = true;
        self.probe_owner.store(0, Ordering::SeqCst);

        if state.record.state != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed);
        }
        state.record = BreakerRecord {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: Some(now),
        };

        self.deps.logger.info(
            "Circuit breaker reset",
            Some(&json!({ "breaker": self.name })),
        );
        self.persist(&state).await;
    }

    /// Decide admission for a call, reserve the probe slot if needed and
    /// consult the throttle
    ///
    /// Only calls that pass both gates count towards `total_requests`. A
    /// throttled probe gives its slot back.
    async fn admit<E>(&self) -> Result<ProbeSlot<'_>, ExecuteError<E>> {
        let mut state = self.state.lock().await;
        self.ensure_hydrated(&mut state).await;
        self.advance_if_cooled(&mut state).await;

        let slot = match state.record.state {
            CircuitState::Closed => ProbeSlot::unclaimed(),
            CircuitState::Open => {
                let retry_after = self.remaining_open(&state);
                return Err(self.reject(&mut state, retry_after));
            }
            CircuitState::HalfOpen => match self.config.half_open_mode {
                HalfOpenMode::Permissive => ProbeSlot::unclaimed(),
                HalfOpenMode::SingleProbe => {
                    let id = self.probe_claims.fetch_add(1, Ordering::SeqCst) + 1;
                    if self
                        .probe_owner
                        .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        return Err(self.reject(&mut state, Duration::ZERO));
                    }
                    debug!(breaker = %self.name, "Admitting half-open probe");
                    ProbeSlot {
                        claim: Some((&self.probe_owner, id)),
                    }
                }
            },
        };

        if self.config.use_throttle {
            if let Some(throttle) = &self.deps.throttle {
                if !throttle.should_allow_request(&self.name) {
                    return Err(ExecuteError::Throttled(ThrottleExceededError {
                        label: self.name.clone(),
                    }));
                }
            }
        }

        state.metrics.total_requests += 1;
        Ok(slot)
    }

    fn reject<E>(&self, state: &mut State, retry_after: Duration) -> ExecuteError<E> {
        state.metrics.rejected_requests += 1;
        metrics::record_circuit_breaker_rejection(&self.name);
        ExecuteError::CircuitOpen(CircuitOpenError {
            name: self.name.clone(),
            retry_after,
        })
    }

    async fn record_timeout(&self) {
        self.state.lock().await.metrics.timeout_count += 1;
        self.deps.logger.warn(
            "Guarded call timed out",
            Some(&json!({
                "breaker": self.name,
                "timeoutMs": self.config.call_timeout_ms,
            })),
        );
        self.record_failure().await;
    }

    /// Open → half-open once the open duration has elapsed
    async fn advance_if_cooled(&self, state: &mut State) {
        if state.record.state == CircuitState::Open && self.cooled_down(&state.record) {
            self.transition(state, CircuitState::HalfOpen);
            self.persist(state).await;
        }
    }

    fn cooled_down(&self, record: &BreakerRecord) -> bool {
        match record.last_failure_time {
            Some(at) => {
                self.deps.clock.now_millis().saturating_sub(at) >= self.config.open_duration_ms
            }
            // Open without a failure time cannot be timed; let it probe
            None => true,
        }
    }

    fn remaining_open(&self, state: &State) -> Duration {
        let elapsed = state
            .record
            .last_failure_time
            .map(|at| self.deps.clock.now_millis().saturating_sub(at))
            .unwrap_or(self.config.open_duration_ms);
        Duration::from_millis(self.config.open_duration_ms.saturating_sub(elapsed))
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.record.state;
        state.record.state = to;

        let data = json!({
            "breaker": self.name,
            "from": from.to_string(),
            "to": to.to_string(),
            "failureCount": state.record.failure_count,
        });

        match to {
            CircuitState::Open => {
                state.metrics.circuit_opened_count += 1;
                self.deps.logger.warn("Circuit breaker opened", Some(&data));
            }
            CircuitState::HalfOpen => {
                state.metrics.circuit_half_opened_count += 1;
                self.deps
                    .logger
                    .info("Circuit breaker half-open, probing", Some(&data));
            }
            CircuitState::Closed => {
                state.record.failure_count = 0;
                state.metrics.circuit_closed_count += 1;
                self.deps.logger.info("Circuit breaker closed", Some(&data));
            }
        }

        metrics::record_circuit_breaker_transition(&self.name, from, to);
    }

    /// Load the stored record once, correcting an open record that has cooled
    async fn ensure_hydrated(&self, state: &mut State) {
        if state.hydrated {
            return;
        }
        state.hydrated = true;

        let Some(store) = &self.deps.store else {
            return;
        };

        let key = self.storage_key();
        let raw = match tokio::time::timeout(self.config.persist_timeout(), store.load(&key)).await
        {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                self.report_storage_failure("load", &e);
                return;
            }
            Err(_) => {
                self.report_storage_failure(
                    "load",
                    &ResilienceError::Storage("timed out".to_string()),
                );
                return;
            }
        };

        let record: BreakerRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                self.report_storage_failure("decode", &ResilienceError::from(e));
                return;
            }
        };

        debug!(
            breaker = %self.name,
            state = %record.state,
            failure_count = record.failure_count,
            "Rehydrated circuit breaker"
        );

        let stale_open = record.state == CircuitState::Open && self.cooled_down(&record);
        state.record = record;
        if stale_open {
            self.transition(state, CircuitState::HalfOpen);
            self.persist(state).await;
        }
    }

    /// Best-effort save; failures are logged and otherwise ignored
    async fn persist(&self, state: &State) {
        let Some(store) = &self.deps.store else {
            return;
        };

        let value = match serde_json::to_string(&state.record) {
            Ok(value) => value,
            Err(e) => {
                self.report_storage_failure("encode", &ResilienceError::from(e));
                return;
            }
        };

        let key = self.storage_key();
        match tokio::time::timeout(self.config.persist_timeout(), store.save(&key, value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report_storage_failure("save", &e),
            Err(_) => self.report_storage_failure(
                "save",
                &ResilienceError::Storage("timed out".to_string()),
            ),
        }
    }

    fn report_storage_failure(&self, action: &str, error: &ResilienceError) {
        self.deps.logger.warn(
            "Circuit breaker state persistence failed",
            Some(&json!({
                "breaker": self.name,
                "action": action,
                "error": error.to_string(),
            })),
        );
    }

    fn snapshot(&self, state: &State) -> BreakerSnapshot {
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.record.state,
            failure_count: state.record.failure_count,
            failure_threshold: self.config.failure_threshold,
            last_failure_time: state.record.last_failure_time,
            last_success_time: state.record.last_success_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Result;
    use crate::logging::MemorySink;
    use crate::storage::MemoryStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStateStore>,
        sink: Arc<MemorySink>,
        deps: BreakerDeps,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStateStore::new());
        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(DedupLogger::with_parts(
            LoggerConfig {
                sweep_probability: 0.0,
                ..Default::default()
            },
            sink.clone(),
            clock.clone(),
        ));
        let deps = BreakerDeps {
            store: Some(store.clone()),
            throttle: None,
            logger,
            clock: clock.clone(),
        };
        Harness {
            clock,
            store,
            sink,
            deps,
        }
    }

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            ..Default::default()
        }
    }

    async fn fail(cb: &CircuitBreaker) -> ExecuteError<&'static str> {
        cb.execute(|| async { Err::<(), _>("boom") })
            .await
            .unwrap_err()
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<String>> {
            Err(ResilienceError::Storage("unavailable".to_string()))
        }

        async fn save(&self, _key: &str, _value: String) -> Result<()> {
            Err(ResilienceError::Storage("unavailable".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new("pages", BreakerConfig::default());
        assert_eq!(cb.state().await.state, CircuitState::Closed);
        assert!(cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());

        for _ in 0..2 {
            fail(&cb).await;
            assert_eq!(cb.state().await.state, CircuitState::Closed);
        }
        fail(&cb).await;

        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(snapshot.last_failure_time, Some(h.clock.now_millis()));
        assert!(!cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_open_circuit_never_invokes_operation() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(1), h.deps.clone());
        fail(&cb).await;

        h.clock.advance(Duration::from_secs(10));
        let calls = AtomicU32::new(0);
        let err = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            ExecuteError::CircuitOpen(e) => {
                assert_eq!(e.name, "pages");
                assert_eq!(e.retry_after, Duration::from_secs(50));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(cb.metrics().await.rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through_unchanged() {
        let cb = CircuitBreaker::new("pages", config(5));
        let err = cb
            .execute(|| async {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow store"))
            })
            .await
            .unwrap_err();

        let inner = err.into_operation_error().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(inner.to_string(), "slow store");
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.execute(|| async { Ok::<_, &str>(7) }).await.unwrap(), 7);

        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.last_success_time.is_some());

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state().await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown_closes_on_success() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(2), h.deps.clone());
        fail(&cb).await;
        fail(&cb).await;

        h.clock.advance(Duration::from_millis(59_999));
        assert!(!cb.can_execute().await);

        h.clock.advance(Duration::from_millis(1));
        assert!(cb.can_execute().await);
        assert_eq!(cb.state().await.state, CircuitState::HalfOpen);

        cb.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);

        let metrics = cb.metrics().await;
        assert_eq!(metrics.circuit_opened_count, 1);
        assert_eq!(metrics.circuit_half_opened_count, 1);
        assert_eq!(metrics.circuit_closed_count, 1);
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(2), h.deps.clone());
        fail(&cb).await;
        fail(&cb).await;

        h.clock.advance(Duration::from_secs(61));
        let err = fail(&cb).await;
        assert!(matches!(err, ExecuteError::Operation("boom")));

        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.last_failure_time, Some(h.clock.now_millis()));

        // Cooldown restarts from the probe failure
        h.clock.advance(Duration::from_secs(30));
        assert!(!cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_reset_from_any_state() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(1), h.deps.clone());
        fail(&cb).await;
        assert_eq!(cb.state().await.state, CircuitState::Open);

        cb.reset().await;
        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.last_success_time, Some(h.clock.now_millis()));
        assert!(cb.can_execute().await);

        let stored = h.store.load("circuit_breaker:pages").await.unwrap().unwrap();
        let record: BreakerRecord = serde_json::from_str(&stored).unwrap();
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.failure_count, 0);
    }

    #[tokio::test]
    async fn test_state_persisted_after_each_mutation() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());
        fail(&cb).await;

        let stored = h.store.load("circuit_breaker:pages").await.unwrap().unwrap();
        let record: BreakerRecord = serde_json::from_str(&stored).unwrap();
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.last_failure_time, Some(h.clock.now_millis()));
    }

    #[tokio::test]
    async fn test_rehydrates_stale_open_as_half_open() {
        let h = harness();
        let record = BreakerRecord {
            state: CircuitState::Open,
            failure_count: 3,
            last_failure_time: Some(h.clock.now_millis() - 120_000),
            last_success_time: None,
        };
        h.store
            .save("circuit_breaker:pages", serde_json::to_string(&record).unwrap())
            .await
            .unwrap();

        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());
        let snapshot = cb.state().await;
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.failure_count, 3);

        let stored = h.store.load("circuit_breaker:pages").await.unwrap().unwrap();
        assert!(stored.contains("HALF_OPEN"));
    }

    #[tokio::test]
    async fn test_rehydrates_recent_open_as_open() {
        let h = harness();
        let record = BreakerRecord {
            state: CircuitState::Open,
            failure_count: 3,
            last_failure_time: Some(h.clock.now_millis() - 1_000),
            last_success_time: None,
        };
        h.store
            .save("circuit_breaker:pages", serde_json::to_string(&record).unwrap())
            .await
            .unwrap();

        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());
        assert!(!cb.can_execute().await);
        assert_eq!(cb.state().await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_corrupt_record_starts_fresh() {
        let h = harness();
        h.store
            .save("circuit_breaker:pages", "not json".to_string())
            .await
            .unwrap();

        let cb = CircuitBreaker::with_deps("pages", config(3), h.deps.clone());
        assert_eq!(cb.state().await.state, CircuitState::Closed);
        assert!(h
            .sink
            .records()
            .iter()
            .any(|r| r.message == "Circuit breaker state persistence failed"));
    }

    #[tokio::test]
    async fn test_storage_failures_do_not_affect_state() {
        let h = harness();
        let deps = BreakerDeps {
            store: Some(Arc::new(BrokenStore)),
            ..h.deps.clone()
        };
        let cb = CircuitBreaker::with_deps("pages", config(2), deps);

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state().await.state, CircuitState::Open);
        assert!(!cb.can_execute().await);

        let warnings: Vec<_> = h
            .sink
            .records()
            .into_iter()
            .filter(|r| r.message.starts_with("Circuit breaker state persistence failed"))
            .collect();
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn test_single_probe_admits_one_call() {
        let h = harness();
        let config = BreakerConfig {
            failure_threshold: 1,
            half_open_mode: HalfOpenMode::SingleProbe,
            ..Default::default()
        };
        let cb = Arc::new(CircuitBreaker::with_deps("pages", config, h.deps.clone()));
        fail(&cb).await;
        h.clock.advance(Duration::from_secs(61));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    release_rx.await.ok();
                    Ok::<_, &str>(())
                })
                .await
            })
        };

        // Wait until the probe holds the slot
        while cb.probe_owner.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!cb.can_execute().await);
        let err = cb.execute(|| async { Ok::<_, &str>(()) }).await.unwrap_err();
        assert!(err.is_circuit_open());

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(cb.state().await.state, CircuitState::Closed);
        assert!(cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_superseded_probe_does_not_free_newer_claim() {
        let h = harness();
        let config = BreakerConfig {
            failure_threshold: 1,
            half_open_mode: HalfOpenMode::SingleProbe,
            ..Default::default()
        };
        let cb = Arc::new(CircuitBreaker::with_deps("pages", config, h.deps.clone()));
        fail(&cb).await;
        h.clock.advance(Duration::from_secs(61));

        let stale = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async {
                    std::future::pending::<()>().await;
                    Ok::<_, &str>(())
                })
                .await
            })
        };
        while cb.probe_owner.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Reset frees the slot while the first call is still running
        cb.reset().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await.state, CircuitState::Open);
        h.clock.advance(Duration::from_secs(61));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let current = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    release_rx.await.ok();
                    Ok::<_, &str>(())
                })
                .await
            })
        };
        while cb.probe_owner.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        stale.abort();
        assert!(stale.await.unwrap_err().is_cancelled());

        assert!(!cb.can_execute().await);
        let err = cb.execute(|| async { Ok::<_, &str>(()) }).await.unwrap_err();
        assert!(err.is_circuit_open());

        release_tx.send(()).unwrap();
        current.await.unwrap().unwrap();
        assert_eq!(cb.state().await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_throttled_probe_gives_slot_back() {
        let h = harness();
        let throttle = Arc::new(ThrottleManager::with_clock(
            crate::throttle::ThrottleConfig {
                burst_limit: 1,
                ..Default::default()
            },
            h.clock.clone(),
        ));
        let deps = BreakerDeps {
            throttle: Some(throttle.clone()),
            ..h.deps.clone()
        };
        let config = BreakerConfig {
            failure_threshold: 1,
            half_open_mode: HalfOpenMode::SingleProbe,
            use_throttle: true,
            ..Default::default()
        };
        let cb = CircuitBreaker::with_deps("pages", config, deps);
        fail(&cb).await;
        h.clock.advance(Duration::from_secs(61));

        // Another caller takes the only burst slot
        assert!(throttle.should_allow_request("other"));

        let err = cb.execute(|| async { Ok::<_, &str>(()) }).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Throttled(_)));
        assert_eq!(cb.probe_owner.load(Ordering::SeqCst), 0);
        assert!(cb.can_execute().await);
        assert_eq!(cb.state().await.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_permissive_half_open_admits_concurrent_calls() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(1), h.deps.clone());
        fail(&cb).await;
        h.clock.advance(Duration::from_secs(61));

        let (a, b) = tokio::join!(
            cb.execute(|| async { Ok::<_, &str>(1) }),
            cb.execute(|| async { Ok::<_, &str>(2) })
        );
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(cb.state().await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_timeout_counts_as_failure() {
        let config = BreakerConfig {
            failure_threshold: 1,
            call_timeout_ms: Some(20),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("pages", config);

        let err = cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Timeout { .. }));
        assert_eq!(cb.state().await.state, CircuitState::Open);
        assert_eq!(cb.metrics().await.timeout_count, 1);
    }

    #[tokio::test]
    async fn test_throttle_gate_rejects_without_invoking() {
        let h = harness();
        let throttle = Arc::new(ThrottleManager::with_clock(
            crate::throttle::ThrottleConfig {
                burst_limit: 1,
                ..Default::default()
            },
            h.clock.clone(),
        ));
        let deps = BreakerDeps {
            throttle: Some(throttle.clone()),
            ..h.deps.clone()
        };
        let config = BreakerConfig {
            use_throttle: true,
            ..Default::default()
        };
        let cb = CircuitBreaker::with_deps("pages", config, deps);

        cb.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();

        let calls = AtomicU32::new(0);
        let err = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Throttled(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.state().await.failure_count, 0);
        assert_eq!(throttle.stats().blocked, 1);

        let metrics = cb.metrics().await;
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.rejected_requests, 0);
    }

    #[tokio::test]
    async fn test_rejections_are_deduplicated_in_logs() {
        let h = harness();
        let cb = CircuitBreaker::with_deps("pages", config(1), h.deps.clone());
        fail(&cb).await;
        h.sink.clear();

        for _ in 0..5 {
            fail(&cb).await;
        }

        let rejections = h
            .sink
            .records()
            .into_iter()
            .filter(|r| r.message.starts_with("Circuit open, call rejected"))
            .count();
        assert_eq!(rejections, 1);
    }
}
