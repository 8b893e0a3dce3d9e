//! Explicit wiring of breakers, throttle and logger
//!
//! A [`ResilienceContext`] is built once from configuration and cloned into
//! whatever needs it. Clones share the same registry, throttle and logger.

use crate::circuit_breaker::{
    BreakerConfig, BreakerDeps, BreakerRegistry, BreakerSnapshot, CircuitBreaker,
};
use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceConfig;
use crate::error::Result;
use crate::logging::{DedupLogger, LogCacheStats, LogSink, TracingSink};
use crate::storage::{build_store, StateStore};
use crate::throttle::{ThrottleManager, ThrottleStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared handle to the resilience layer
#[derive(Debug, Clone)]
pub struct ResilienceContext {
    config: Arc<ResilienceConfig>,
    registry: BreakerRegistry,
    throttle: Arc<ThrottleManager>,
    logger: Arc<DedupLogger>,
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub breakers: Vec<BreakerSnapshot>,
    pub throttle: ThrottleStats,
    pub log_cache: LogCacheStats,
}

impl ResilienceContext {
    /// Validate `config`, connect the configured store and wire everything up
    pub async fn from_config(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;
        let store = build_store(&config.storage).await?;
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(TracingSink),
            Arc::new(SystemClock),
        ))
    }

    /// Wire a context from explicit parts without touching external systems
    pub fn with_parts(
        config: ResilienceConfig,
        store: Option<Arc<dyn StateStore>>,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let logger = Arc::new(DedupLogger::with_parts(
            config.logger.clone(),
            sink,
            clock.clone(),
        ));
        let throttle = Arc::new(
            ThrottleManager::with_clock(config.throttle.clone(), clock.clone())
                .with_logger(logger.clone()),
        );
        let deps = BreakerDeps {
            store,
            throttle: Some(throttle.clone()),
            logger: logger.clone(),
            clock: clock.clone(),
        };
        let registry = BreakerRegistry::with_deps(config.breaker.clone(), deps);

        info!(
            named_breakers = config.breakers.len(),
            persistent = !matches!(config.storage, crate::storage::StorageConfig::None),
            "Resilience context ready"
        );

        Self {
            config: Arc::new(config),
            registry,
            throttle,
            logger,
            clock,
        }
    }

    /// Breaker for `name`, created from its configured entry on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.registry
            .get_or_create(name, Some(self.config.breaker_config(name)))
    }

    /// Breaker for `name`, created with `config` if it does not exist yet
    pub fn breaker_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.registry.get_or_create(name, Some(config))
    }

    pub fn should_allow_request(&self, label: &str) -> bool {
        self.throttle.should_allow_request(label)
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub fn throttle(&self) -> &Arc<ThrottleManager> {
        &self.throttle
    }

    pub fn logger(&self) -> &Arc<DedupLogger> {
        &self.logger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            breakers: self.registry.snapshot_all().await,
            throttle: self.throttle.stats(),
            log_cache: self.logger.cache_stats(),
        }
    }
}
