use super::sink::{LogSink, TracingSink};
use super::types::{
    CacheEntryStats, LogCacheEntry, LogCacheStats, LogLevel, LogRecord, LoggerConfig,
};
use crate::clock::{Clock, SystemClock};
use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// What to do with a line after consulting the cache
enum Decision {
    Emit(u64),
    Suppress,
}

/// Logger that folds repeated identical lines together
///
/// A line is identified by a fingerprint over its level, message and a
/// truncated serialization of its payload. The first sighting is always
/// emitted; repeats inside the dedup window are counted and only every
/// `emit_every`-th one reaches the sink, annotated with the running count.
#[derive(Debug)]
pub struct DedupLogger {
    config: LoggerConfig,
    cache: DashMap<String, LogCacheEntry>,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
}

impl DedupLogger {
    /// Create a logger writing to `tracing` with the system clock
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_parts(config, Arc::new(TracingSink), Arc::new(SystemClock))
    }

    /// Create a logger with an explicit sink and clock
    pub fn with_parts(config: LoggerConfig, sink: Arc<dyn LogSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            cache: DashMap::new(),
            sink,
            clock,
        }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Log a line subject to deduplication
    pub fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        if level.is_verbose() && !self.config.verbose {
            return;
        }

        let now = self.clock.now_millis();
        let fingerprint = self.fingerprint(level, message, data);

        let decision = match self.cache.entry(fingerprint) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now.saturating_sub(entry.timestamp) < self.config.dedup_window_ms {
                    entry.occurrences += 1;
                    entry.timestamp = now;
                    if entry.occurrences % self.config.emit_every.max(1) == 0 {
                        Decision::Emit(entry.occurrences)
                    } else {
                        Decision::Suppress
                    }
                } else {
                    *entry = LogCacheEntry {
                        level,
                        message: message.to_string(),
                        timestamp: now,
                        occurrences: 1,
                    };
                    Decision::Emit(1)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LogCacheEntry {
                    level,
                    message: message.to_string(),
                    timestamp: now,
                    occurrences: 1,
                });
                Decision::Emit(1)
            }
        };

        match decision {
            Decision::Emit(occurrences) => {
                let message = if occurrences > 1 {
                    format!("{} (repeated {} times)", message, occurrences)
                } else {
                    message.to_string()
                };
                self.write(LogRecord {
                    level,
                    message,
                    data: data.cloned(),
                    occurrences,
                    forced: false,
                    timestamp: now,
                });
            }
            Decision::Suppress => metrics::record_log_suppressed(level.as_str()),
        }

        if rand::random::<f64>() < self.config.sweep_probability {
            self.sweep();
        }
    }

    /// Emit a line unconditionally, skipping the dedup cache
    pub fn force(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        self.write(LogRecord {
            level,
            message: message.to_string(),
            data: data.cloned(),
            occurrences: 1,
            forced: true,
            timestamp: self.clock.now_millis(),
        });
    }

    pub fn debug(&self, message: &str, data: Option<&Value>) {
        self.log(LogLevel::Debug, message, data);
    }

    pub fn info(&self, message: &str, data: Option<&Value>) {
        self.log(LogLevel::Info, message, data);
    }

    pub fn warn(&self, message: &str, data: Option<&Value>) {
        self.log(LogLevel::Warn, message, data);
    }

    pub fn error(&self, message: &str, data: Option<&Value>) {
        self.log(LogLevel::Error, message, data);
    }

    pub fn critical(&self, message: &str, data: Option<&Value>) {
        self.log(LogLevel::Critical, message, data);
    }

    /// Evict expired fingerprints, then the oldest ones until within capacity
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let window = self.config.dedup_window_ms;
        let before = self.cache.len();

        self.cache
            .retain(|_, entry| now.saturating_sub(entry.timestamp) < window);

        let len = self.cache.len();
        if len > self.config.max_cache_size {
            let mut by_age: Vec<(String, u64)> = self
                .cache
                .iter()
                .map(|e| (e.key().clone(), e.value().timestamp))
                .collect();
            by_age.sort_by_key(|(_, timestamp)| *timestamp);

            for (key, _) in by_age.into_iter().take(len - self.config.max_cache_size) {
                self.cache.remove(&key);
            }
        }

        before.saturating_sub(self.cache.len())
    }

    pub fn cache_stats(&self) -> LogCacheStats {
        let now = self.clock.now_millis();
        let entries: Vec<CacheEntryStats> = self
            .cache
            .iter()
            .map(|e| CacheEntryStats {
                key: e.key().clone(),
                level: e.value().level,
                message: e.value().message.clone(),
                count: e.value().occurrences,
                age: now.saturating_sub(e.value().timestamp),
            })
            .collect();

        LogCacheStats {
            size: entries.len(),
            entries,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn fingerprint(&self, level: LogLevel, message: &str, data: Option<&Value>) -> String {
        let payload: String = match data {
            Some(value) => serde_json::to_string(value)
                .unwrap_or_default()
                .chars()
                .take(self.config.payload_truncate)
                .collect(),
            None => String::new(),
        };

        let mut hasher = Sha256::new();
        hasher.update(level.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(message.as_bytes());
        hasher.update([0x1f]);
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn write(&self, record: LogRecord) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.sink.emit(&record)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "sink panicked".to_string(),
        };

        // Last resort; nothing here may fail loudly
        let _ = writeln!(
            std::io::stderr(),
            "[{}] {} (log sink failed: {})",
            record.level,
            record.message,
            failure
        );
    }
}
