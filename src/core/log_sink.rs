//! Bounded in-memory log of queue activity
//!
//! Entries are mirrored into `tracing` and kept for display/export. Pushing is a
//! short lock plus a ring-buffer append, so workers never wait on readers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub job_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.label()
        )?;
        if let Some(job_id) = &self.job_id {
            write!(f, " [{}]", job_id)?;
        }
        write!(f, " {}", self.message)
    }
}

#[derive(Debug)]
pub struct LogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            capacity,
        }
    }

    pub fn log(&self, level: LogLevel, job_id: Option<&str>, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            job_id: job_id.map(str::to_string),
            message: message.into(),
        };

        let job = entry.job_id.as_deref().unwrap_or("-");
        match level {
            LogLevel::Debug => tracing::debug!(job_id = job, "{}", entry.message),
            LogLevel::Info | LogLevel::Success => tracing::info!(job_id = job, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(job_id = job, "{}", entry.message),
            LogLevel::Error => tracing::error!(job_id = job, "{}", entry.message),
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, job_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Info, job_id, message);
    }

    pub fn success(&self, job_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Success, job_id, message);
    }

    pub fn warning(&self, job_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Warning, job_id, message);
    }

    pub fn error(&self, job_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Error, job_id, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries logged for one job, oldest first
    pub fn entries_for(&self, job_id: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Plain-text export, one entry per line
    pub fn export_text(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        for entry in entries.iter() {
            let _ = writeln!(out, "{}", entry);
        }
        out
    }
}
