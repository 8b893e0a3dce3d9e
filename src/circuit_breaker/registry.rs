use super::breaker::{BreakerDeps, CircuitBreaker};
use super::types::{BreakerConfig, BreakerSnapshot, CircuitBreakerMetrics};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of named circuit breakers
///
/// Breakers are created on first request and live for the registry's lifetime.
/// The configuration a breaker was created with is kept even if a later
/// request supplies a different one.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    /// Circuit breakers per name
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Configuration for breakers requested without one
    default_config: BreakerConfig,
    deps: BreakerDeps,
}

impl BreakerRegistry {
    /// Create a registry with in-memory breakers and default collaborators
    pub fn new(default_config: BreakerConfig) -> Self {
        Self::with_deps(default_config, BreakerDeps::default())
    }

    pub fn with_deps(default_config: BreakerConfig, deps: BreakerDeps) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            default_config,
            deps,
        }
    }

    /// Get the breaker for `name`, creating it with `config` if it does not exist
    pub fn get_or_create(&self, name: &str, config: Option<BreakerConfig>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::with_deps(
                    name,
                    config.unwrap_or_else(|| self.default_config.clone()),
                    self.deps.clone(),
                ))
            })
            .clone()
    }

    /// Get an existing breaker without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Names of all registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }

    /// State of every breaker, sorted by name
    pub async fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.all();
        let snapshots = join_all(breakers.iter().map(|b| b.state())).await;
        snapshots
    }

    /// Metrics of every breaker, sorted by name
    pub async fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        let breakers = self.all();
        let metrics = join_all(breakers.iter().map(|b| b.metrics())).await;
        breakers
            .iter()
            .map(|b| b.name().to_string())
            .zip(metrics)
            .collect()
    }

    /// Force every breaker closed
    pub async fn reset_all(&self) {
        let breakers = self.all();
        join_all(breakers.iter().map(|b| b.reset())).await;
        info!(count = breakers.len(), "Reset all circuit breakers");
    }
}
