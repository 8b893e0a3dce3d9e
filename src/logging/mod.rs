//! Deduplicating log sink
//!
//! Repeated identical lines (same level, message and payload prefix) inside a
//! short window are folded into one entry and only periodically re-emitted with
//! their running count, so a downstream failure logged on every call does not
//! drown out other signals.
//!
//! # Example
//!
//! ```rust
//! use resilience::logging::{DedupLogger, LogLevel, LoggerConfig};
//!
//! let logger = DedupLogger::new(LoggerConfig::default());
//! logger.log(LogLevel::Error, "query failed", Some(&serde_json::json!({"collection": "pages"})));
//! logger.force(LogLevel::Warn, "shutting down", None);
//! ```

pub mod dedup;
pub mod sink;
pub mod types;

pub use dedup::DedupLogger;
pub use sink::{BroadcastSink, LogSink, MemorySink, TracingSink};
pub use types::{CacheEntryStats, LogCacheStats, LogLevel, LogRecord, LoggerConfig};
