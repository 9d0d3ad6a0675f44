//! Bounded in-memory log ring.
//!
//! Every state transition and blocking cause lands here as well as in the
//! `tracing` stream; the ring survives into the final report even when no
//! subscriber is installed. When the buffer exceeds its cap it is trimmed to
//! half, oldest entries first.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub time_hours: f64,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBuffer {
    entries: Vec<LogEntry>,
    capacity: usize,
    /// Total entries ever pushed, including trimmed ones.
    total: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, time_hours: f64, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(time_hours, "{message}"),
            LogLevel::Info => tracing::info!(time_hours, "{message}"),
            LogLevel::Warn => tracing::warn!(time_hours, "{message}"),
            LogLevel::Error => tracing::error!(time_hours, "{message}"),
        }
        self.entries.push(LogEntry {
            time_hours,
            level,
            message,
        });
        self.total += 1;
        if self.entries.len() > self.capacity {
            let keep_from = self.entries.len() - self.capacity / 2;
            self.entries.drain(..keep_from);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
