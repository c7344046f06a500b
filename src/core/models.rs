//! Core data models for the download queue

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::settings::SettingsSnapshot;
use crate::utils::validation::{is_playlist_url, validate_media_url};

/// Job status enumeration

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,

    Active,

    Completed,

    Failed,

    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled are final; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Active)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Active, JobStatus::Completed)
                | (JobStatus::Active, JobStatus::Failed)
                | (JobStatus::Active, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Active => "Active",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// What a job downloads: a direct media URL or a free-text search query

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value")]
pub enum JobSource {
    Url(String),

    Search(String),
}

impl JobSource {
    /// Parse user input into a source reference.
    ///
    /// `http`/`https` input must be a well-formed URL with a host. Input carrying
    /// any other scheme is rejected outright; everything else is treated as a
    /// search query, which needs at least one alphanumeric character.
    pub fn parse(input: &str) -> AppResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidSource("source is empty".to_string()));
        }

        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            let url = validate_media_url(trimmed)
                .map_err(|e| AppError::InvalidSource(format!("{}: {}", trimmed, e)))?;
            return Ok(JobSource::Url(url.to_string()));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(AppError::InvalidSource(format!(
                "unsupported scheme '{}' in {}",
                scheme, trimmed
            )));
        }

        if trimmed.chars().any(char::is_control) {
            return Err(AppError::InvalidSource(
                "search query contains control characters".to_string(),
            ));
        }

        if !trimmed.chars().any(char::is_alphanumeric) {
            return Err(AppError::InvalidSource(format!(
                "'{}' is neither a URL nor a usable search query",
                trimmed
            )));
        }

        Ok(JobSource::Search(trimmed.to_string()))
    }

    /// The raw reference as the user sees it
    pub fn as_str(&self) -> &str {
        match self {
            JobSource::Url(url) => url,
            JobSource::Search(query) => query,
        }
    }

    /// Target string understood by yt-dlp
    pub fn adapter_target(&self) -> String {
        match self {
            JobSource::Url(url) => url.clone(),
            JobSource::Search(query) => format!("ytsearch:{}", query),
        }
    }

    pub fn is_playlist(&self) -> bool {
        match self {
            JobSource::Url(url) => Url::parse(url).map(|u| is_playlist_url(&u)).unwrap_or(false),
            JobSource::Search(_) => false,
        }
    }
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single queued download

#[derive(Debug, Clone, Serialize, Deserialize)]

pub struct DownloadJob {
    pub id: String,

    /// Enqueue sequence; FIFO admission follows this number
    pub sequence: u64,

    pub source: JobSource,

    pub settings: SettingsSnapshot,

    pub status: JobStatus,

    pub progress: f64,

    pub error: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub updated_at: chrono::DateTime<chrono::Utc>,

    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadJob {
    pub fn new(id: String, sequence: u64, source: JobSource, settings: SettingsSnapshot) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            sequence,
            source,
            settings,
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Queue scheduling configuration

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]

pub struct QueueConfig {
    /// Maximum number of jobs allowed to be Active at once
    pub concurrency_limit: usize,

    /// How long a cancelled Active job may take to acknowledge before it is
    /// force-marked Cancelled
    pub cancel_grace_period_ms: u64,

    /// Start processing as soon as the binary has enqueued its sources
    pub auto_start: bool,
}

impl QueueConfig {
    pub fn cancel_grace_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cancel_grace_period_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,

            cancel_grace_period_ms: 5_000,

            auto_start: false,
        }
    }
}

/// Per-status job counts

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]

pub struct QueueStats {
    pub total_jobs: usize,

    pub pending_jobs: usize,

    pub active_jobs: usize,

    pub completed_jobs: usize,

    pub failed_jobs: usize,

    pub cancelled_jobs: usize,
}

impl QueueStats {
    /// Nothing is waiting or running
    pub fn is_idle(&self) -> bool {
        self.pending_jobs == 0 && self.active_jobs == 0
    }
}

/// Application error types

#[derive(Debug, thiserror::Error)]

pub enum AppError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Adapter failure: {0}")]
    Adapter(String),

    #[error("Cancellation of job {job_id} not acknowledged within {grace_ms}ms")]
    CancellationTimeout { job_id: String, grace_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("System error: {0}")]
    System(String),
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;
