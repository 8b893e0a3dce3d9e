use super::types::{LogLevel, LogRecord};
use crate::error::{ResilienceError, Result};
use std::fmt::Debug;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Destination for lines that survive deduplication
pub trait LogSink: Send + Sync + Debug {
    fn emit(&self, record: &LogRecord) -> Result<()>;
}

/// Sink that forwards records into `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        let data = record
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        match record.level {
            LogLevel::Debug => debug!(
                occurrences = record.occurrences,
                forced = record.forced,
                data = %data,
                "{}",
                record.message
            ),
            LogLevel::Info => info!(
                occurrences = record.occurrences,
                forced = record.forced,
                data = %data,
                "{}",
                record.message
            ),
            LogLevel::Warn => warn!(
                occurrences = record.occurrences,
                forced = record.forced,
                data = %data,
                "{}",
                record.message
            ),
            LogLevel::Error => error!(
                occurrences = record.occurrences,
                forced = record.forced,
                data = %data,
                "{}",
                record.message
            ),
            LogLevel::Critical => error!(
                critical = true,
                occurrences = record.occurrences,
                forced = record.forced,
                data = %data,
                "{}",
                record.message
            ),
        }

        Ok(())
    }
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|e| ResilienceError::Sink(format!("Memory sink poisoned: {}", e)))?
            .push(record.clone());
        Ok(())
    }
}

/// Sink that fans records out to live subscribers
///
/// Lines emitted while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<LogRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl LogSink for BroadcastSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        // A send error only means there are no receivers right now
        let _ = self.sender.send(record.clone());
        Ok(())
    }
}
