//! Bounded, append-only network event log
//!
//! Every entry is mirrored into `tracing` and multicast to log observers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Default number of entries retained
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Actor or subsystem that produced the entry
    pub source: String,
    pub message: String,
    /// Optional structured detail
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Most-recent-N event log
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    observers: broadcast::Sender<LogEntry>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (observers, _) = broadcast::channel(capacity);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            observers,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn record(
        &self,
        level: LogLevel,
        source: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let entry = LogEntry {
            level,
            source: source.to_string(),
            message: message.into(),
            data,
            timestamp: Utc::now(),
        };

        match entry.level {
            LogLevel::Debug => tracing::debug!(source = %entry.source, "{}", entry.message),
            LogLevel::Info => tracing::info!(source = %entry.source, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(source = %entry.source, "{}", entry.message),
            LogLevel::Error => tracing::error!(source = %entry.source, "{}", entry.message),
        }

        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No observers is fine
        let _ = self.observers.send(entry);
    }

    /// Subscribe to entries recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.observers.subscribe()
    }

    /// Up to `limit` most recent entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_keeps_most_recent() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.record(LogLevel::Info, "test", format!("entry {}", i), None);
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_recent_limit() {
        let log = EventLog::new(10);
        for i in 0..4 {
            log.record(LogLevel::Debug, "test", format!("entry {}", i), None);
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].message, "entry 3");
    }

    #[tokio::test]
    async fn test_observers_receive_entries() {
        let log = EventLog::default();
        let mut rx_a = log.subscribe();
        let mut rx_b = log.subscribe();

        log.record(
            LogLevel::Warn,
            "broker",
            "dropped",
            Some(serde_json::json!({ "receiver": "node-9" })),
        );

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();
        assert_eq!(a.level, LogLevel::Warn);
        assert_eq!(b.data.unwrap()["receiver"], "node-9");
    }
}
