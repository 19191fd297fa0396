//! Append-only activity log
//!
//! Human-readable entries for the notification layer. Every entry is also
//! emitted as a tracing event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
    tx: broadcast::Sender<LogEntry>,
    source: &'static str,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(LOG_CAPACITY);
        Self { tx, source: "stream" }
    }

    /// Handle writing to the same log, tagging its tracing events with `source`
    pub fn scoped(&self, source: &'static str) -> Self {
        Self {
            tx: self.tx.clone(),
            source,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogLevel::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!(source = self.source, "{}", message),
            LogLevel::Warning => warn!(source = self.source, "{}", message),
            LogLevel::Error => error!(source = self.source, "{}", message),
        }

        // no subscribers is fine
        let _ = self.tx.send(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }
}
