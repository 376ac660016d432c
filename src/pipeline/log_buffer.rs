use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::LogLevel;

const DEFAULT_CAPACITY: usize = 1000;

/// One entry in the volatile health/logs view.
#[derive(Debug, Clone, Serialize)]
pub struct BufferedLog {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Fixed-capacity ring buffer behind the live "Health & Logs" surface.
/// Volatile by design; the run_logs table is the durable record.
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<BufferedLog>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, level: LogLevel, message: &str) {
        let mut entries = self.entries.lock().expect("log buffer lock");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(BufferedLog {
            ts: Utc::now(),
            level,
            message: message.to_string(),
        });
    }

    /// Up to `limit` entries, oldest first. Zero means everything retained.
    #[allow(dead_code)]
    pub fn recent(&self, limit: usize) -> Vec<BufferedLog> {
        let entries = self.entries.lock().expect("log buffer lock");
        let skip = if limit == 0 || limit >= entries.len() {
            0
        } else {
            entries.len() - limit
        };
        entries.iter().skip(skip).cloned().collect()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("log buffer lock").len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.entries.lock().expect("log buffer lock").clear();
    }

    /// Process-wide buffer shared by every run.
    pub fn global() -> &'static LogBuffer {
        static GLOBAL: OnceLock<LogBuffer> = OnceLock::new();
        GLOBAL.get_or_init(|| LogBuffer::new(DEFAULT_CAPACITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_at_capacity() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogLevel::Info, &format!("entry {i}"));
        }
        assert_eq!(buffer.len(), 3);
        let recent = buffer.recent(0);
        assert_eq!(recent[0].message, "entry 2");
        assert_eq!(recent[2].message, "entry 4");
    }

    #[test]
    fn recent_respects_the_limit() {
        let buffer = LogBuffer::new(10);
        for i in 0..6 {
            buffer.push(LogLevel::Warn, &format!("entry {i}"));
        }
        let last_two = buffer.recent(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].message, "entry 5");
    }

    #[test]
    fn clear_empties_the_buffer() {
        let buffer = LogBuffer::new(4);
        buffer.push(LogLevel::Error, "boom");
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
