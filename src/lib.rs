//! Media Queue - Core Library
//!
//! A bounded, concurrent download queue in front of a media downloading
//! backend (yt-dlp), with immutable per-job settings, presets and an in-memory
//! activity log.

pub mod core;
pub mod downloaders;
pub mod utils;

// Re-export commonly used types
pub use core::{
    adapter::{DownloadAdapter, FetchOutcome},
    config::AppConfig,
    log_sink::LogSink,
    manager::{QueueEvent, QueueManager},
    models::{AppError, AppResult, DownloadJob, JobSource, JobStatus, QueueStats},
    runtime::{spawn_queue_runtime, QueueRuntimeHandle},
    settings::{DownloadSettings, PresetStore, SettingsSnapshot},
};
pub use downloaders::YtDlpAdapter;

use std::sync::Arc;

/// Application state shared by front ends
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub log_sink: Arc<LogSink>,
    pub queue: QueueRuntimeHandle,
}

impl AppState {
    /// Build the queue around `adapter` and spawn its runtime on the current
    /// tokio runtime
    pub fn new(config: AppConfig, adapter: Arc<dyn DownloadAdapter>) -> AppResult<Self> {
        let log_sink = Arc::new(LogSink::new(config.logging.history_capacity));
        let (manager, adapter_events) =
            QueueManager::new(config.queue.clone(), adapter, Arc::clone(&log_sink));
        let queue = spawn_queue_runtime(manager, adapter_events)?;

        Ok(Self {
            config: Arc::new(config),
            log_sink,
            queue,
        })
    }

    /// State backed by the yt-dlp adapter described in `config.downloader`
    pub fn with_ytdlp(config: AppConfig) -> AppResult<Self> {
        let adapter = Arc::new(YtDlpAdapter::from_config(&config.downloader));
        Self::new(config, adapter)
    }

    /// Snapshot of the active preset for enqueueing
    pub fn active_settings(&self) -> AppResult<SettingsSnapshot> {
        self.config.presets.snapshot(&self.config.active_preset)
    }

    /// Enqueue every source with the active preset, expanding playlists.
    ///
    /// With `queue.auto_start` the queue is started first, so downloads begin
    /// while later sources are still being resolved. Otherwise nothing runs
    /// until the caller starts the queue. Returns the rejected sources.
    pub async fn submit(&self, sources: &[String]) -> AppResult<Vec<(String, AppError)>> {
        let settings = self.active_settings()?;
        if self.config.queue.auto_start {
            self.queue.start_all().await?;
        }

        let mut rejected = Vec::new();
        for source in sources {
            if let Err(error) = self
                .queue
                .enqueue_resolved(source, Arc::clone(&settings))
                .await
            {
                tracing::warn!("Rejected source {}: {}", source, error);
                rejected.push((source.clone(), error));
            }
        }
        Ok(rejected)
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the default level
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing("info");
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}
