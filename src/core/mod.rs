//! Core business logic module
//!
//! This module contains the domain models, the queue manager and its runtime,
//! the adapter seam, settings/presets, configuration and the log sink.

pub mod adapter;
pub mod config;
pub mod log_sink;
pub mod manager;
pub mod models;
pub mod runtime;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;



// Re-export commonly used types
pub use adapter::{DownloadAdapter, FetchHandle, FetchOutcome, FetchRequest, ProgressReporter};
pub use config::AppConfig;
pub use log_sink::{LogEntry, LogLevel, LogSink};
pub use manager::{QueueEvent, QueueManager};
pub use models::{AppError, AppResult, DownloadJob, JobSource, JobStatus, QueueConfig, QueueStats};
pub use runtime::{spawn_queue_runtime, QueueRuntimeHandle};
pub use settings::{DownloadSettings, PresetStore, SettingsSnapshot};
