use crate::circuit_breaker::BreakerConfig;
use crate::error::{ResilienceError, Result};
use crate::logging::LoggerConfig;
use crate::storage::StorageConfig;
use crate::throttle::ThrottleConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration for the resilience layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Configuration for breakers without a named entry
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Per-name breaker configuration
    #[serde(default)]
    pub breakers: HashMap<String, BreakerConfig>,
    /// Global request throttle
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Deduplicating logger
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Breaker state persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Process-wide tracing output
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn default_filter() -> String {
    "resilience=info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

impl ResilienceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResilienceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Configuration for the breaker called `name`
    pub fn breaker_config(&self, name: &str) -> BreakerConfig {
        self.breakers
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.breaker.clone())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_breaker("default", &self.breaker)?;
        for (name, breaker) in &self.breakers {
            if name.is_empty() {
                return Err(ResilienceError::Config(
                    "Breaker name cannot be empty".to_string(),
                ));
            }
            validate_breaker(name, breaker)?;
        }

        let throttle = &self.throttle;
        if throttle.max_per_window == 0 || throttle.burst_limit == 0 {
            return Err(ResilienceError::Config(
                "Throttle limits must be > 0".to_string(),
            ));
        }
        if throttle.window_ms == 0 || throttle.burst_window_ms == 0 {
            return Err(ResilienceError::Config(
                "Throttle windows must be > 0".to_string(),
            ));
        }
        if throttle.burst_window_ms > throttle.window_ms {
            return Err(ResilienceError::Config(
                "Throttle burst window cannot exceed the sustained window".to_string(),
            ));
        }

        let logger = &self.logger;
        if logger.emit_every == 0 {
            return Err(ResilienceError::Config(
                "Logger emit_every must be > 0".to_string(),
            ));
        }
        if logger.max_cache_size == 0 {
            return Err(ResilienceError::Config(
                "Logger max_cache_size must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&logger.sweep_probability) {
            return Err(ResilienceError::Config(format!(
                "Logger sweep_probability must be within [0, 1], got {}",
                logger.sweep_probability
            )));
        }

        match &self.storage {
            StorageConfig::File { path } if path.is_empty() => Err(ResilienceError::Config(
                "File storage path cannot be empty".to_string(),
            )),
            StorageConfig::Redis { url, .. }
                if !url.starts_with("redis://") && !url.starts_with("rediss://") =>
            {
                Err(ResilienceError::Config(format!(
                    "Redis URL must start with redis:// or rediss://, got {}",
                    url
                )))
            }
            _ => Ok(()),
        }
    }
}

fn validate_breaker(name: &str, config: &BreakerConfig) -> Result<()> {
    if config.failure_threshold == 0 {
        return Err(ResilienceError::Config(format!(
            "Breaker failure_threshold must be >= 1 for: {}",
            name
        )));
    }
    if config.call_timeout_ms == Some(0) {
        return Err(ResilienceError::Config(format!(
            "Breaker call_timeout_ms must be > 0 for: {}",
            name
        )));
    }
    Ok(())
}
