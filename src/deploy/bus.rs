//! In-memory log bus between the deployment executor and stream readers.
//!
//! Producers never block. Readers wait up to a bounded timeout so the HTTP
//! layer can emit heartbeats on idle connections.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Timestamp format for log records: local time, second precision.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Severity / kind of a published log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warning,
    /// Raw line captured from the remote command.
    Output,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Output => write!(f, "OUTPUT"),
        }
    }
}

/// A single timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    /// Create a record stamped with the current local time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            level,
            message: message.into(),
        }
    }
}

/// Unbounded FIFO of [`LogRecord`]s shared between one producer task and any
/// number of competing readers.
#[derive(Debug, Default)]
pub struct LogBus {
    queue: Mutex<VecDeque<LogRecord>>,
    notify: Notify,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record and wake waiting readers. Never blocks on readers.
    pub fn publish(&self, record: LogRecord) {
        match record.level {
            LogLevel::Error => tracing::error!(level = %record.level, "{}", record.message),
            LogLevel::Warning => tracing::warn!(level = %record.level, "{}", record.message),
            _ => tracing::info!(level = %record.level, "{}", record.message),
        }
        self.queue().push_back(record);
        self.notify.notify_waiters();
    }

    /// Shorthand for `publish(LogRecord::now(level, message))`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(LogRecord::now(level, message));
    }

    /// Remove and return the oldest unread record without waiting.
    pub fn try_consume(&self) -> Option<LogRecord> {
        self.queue().pop_front()
    }

    /// Remove and return the oldest unread record, waiting up to `timeout`.
    ///
    /// `None` means nothing arrived in time; callers use it as the cue for a
    /// heartbeat.
    pub async fn consume(&self, timeout: Duration) -> Option<LogRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the queue so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(record) = self.try_consume() {
                return Some(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Discard every unread record.
    pub fn reset(&self) {
        let dropped = {
            let mut queue = self.queue();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!(dropped, "log bus reset");
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_level_serializes_uppercase() {
        let record = LogRecord {
            timestamp: "2024-01-01 12:00:00".to_string(),
            level: LogLevel::Output,
            message: "hello".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "OUTPUT");
        assert_eq!(json["message"], "hello");
        assert_eq!(json["timestamp"], "2024-01-01 12:00:00");
    }

    #[test]
    fn test_timestamp_has_second_precision() {
        let record = LogRecord::now(LogLevel::Info, "x");
        // "YYYY-MM-DD HH:MM:SS"
        assert_eq!(record.timestamp.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_consume_preserves_publish_order() {
        let bus = LogBus::new();
        bus.log(LogLevel::Output, "A");
        bus.log(LogLevel::Output, "B");
        bus.log(LogLevel::Output, "C");

        let timeout = Duration::from_millis(10);
        let mut seen = Vec::new();
        while let Some(r) = bus.consume(timeout).await {
            seen.push(r.message);
        }
        assert_eq!(seen, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_consume_times_out_when_empty() {
        let bus = LogBus::new();
        let started = std::time::Instant::now();
        assert!(bus.consume(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_consume_wakes_on_publish() {
        let bus = Arc::new(LogBus::new());
        let producer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.log(LogLevel::Info, "late");
        });

        let record = bus.consume(Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.message, "late");
    }

    #[tokio::test]
    async fn test_publish_from_blocking_thread() {
        let bus = Arc::new(LogBus::new());
        let producer = bus.clone();
        std::thread::spawn(move || {
            for i in 0..100 {
                producer.log(LogLevel::Output, format!("line {i}"));
            }
        });

        for i in 0..100 {
            let record = bus.consume(Duration::from_secs(5)).await.unwrap();
            assert_eq!(record.message, format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_reset_discards_unread() {
        let bus = LogBus::new();
        bus.log(LogLevel::Output, "stale 1");
        bus.log(LogLevel::Output, "stale 2");
        bus.reset();
        assert!(bus.is_empty());

        bus.log(LogLevel::Info, "fresh");
        let record = bus.consume(Duration::from_millis(10)).await.unwrap();
        assert_eq!(record.message, "fresh");
        assert!(bus.consume(Duration::from_millis(10)).await.is_none());
    }
}
