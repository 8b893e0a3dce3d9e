use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Debug and info lines may be dropped entirely when verbosity is off
    pub fn is_verbose(&self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Info)
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplicating logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Window in which identical lines are folded together, in milliseconds
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Maximum number of fingerprints kept after a sweep
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Re-emit a repeated line every N occurrences
    #[serde(default = "default_emit_every")]
    pub emit_every: u64,

    /// Chance in [0, 1] that a call triggers a cache sweep
    #[serde(default = "default_sweep_probability")]
    pub sweep_probability: f64,

    /// Characters of serialized payload that contribute to the fingerprint
    #[serde(default = "default_payload_truncate")]
    pub payload_truncate: usize,

    /// Emit debug and info lines
    #[serde(default = "default_verbose")]
    pub verbose: bool,
}

fn default_dedup_window_ms() -> u64 {
    5000
}

fn default_max_cache_size() -> usize {
    100
}

fn default_emit_every() -> u64 {
    10
}

fn default_sweep_probability() -> f64 {
    0.1
}

fn default_payload_truncate() -> usize {
    200
}

fn default_verbose() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            max_cache_size: default_max_cache_size(),
            emit_every: default_emit_every(),
            sweep_probability: default_sweep_probability(),
            payload_truncate: default_payload_truncate(),
            verbose: default_verbose(),
        }
    }
}

impl LoggerConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// A line handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Occurrences folded into this line (1 for first sightings)
    pub occurrences: u64,
    /// Emitted through `force`, bypassing deduplication
    #[serde(default)]
    pub forced: bool,
    /// Epoch milliseconds
    pub timestamp: u64,
}

/// One fingerprint tracked by the logger
#[derive(Debug, Clone)]
pub(crate) struct LogCacheEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: u64,
    pub occurrences: u64,
}

/// Snapshot of a cached fingerprint
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStats {
    /// Fingerprint of level, message and payload prefix
    pub key: String,
    pub level: LogLevel,
    pub message: String,
    pub count: u64,
    /// Milliseconds since the fingerprint was last seen
    pub age: u64,
}

/// Logger cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct LogCacheStats {
    pub size: usize,
    pub entries: Vec<CacheEntryStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.dedup_window_ms, 5000);
        assert_eq!(config.max_cache_size, 100);
        assert_eq!(config.emit_every, 10);
        assert_eq!(config.sweep_probability, 0.1);
        assert!(config.verbose);
        assert_eq!(config.dedup_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_level_ordering_and_verbosity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert!(LogLevel::Info.is_verbose());
        assert!(!LogLevel::Warn.is_verbose());
        assert_eq!(LogLevel::Critical.to_string(), "critical");
    }

    #[test]
    fn test_record_serialization() {
        let record = LogRecord {
            level: LogLevel::Warn,
            message: "slow".to_string(),
            data: None,
            occurrences: 1,
            forced: false,
            timestamp: 42,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "warn");
        assert!(json.get("data").is_none());
    }
}
