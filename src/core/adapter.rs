//! Seam between the queue and the library that actually fetches media
//!
//! Adapters never touch queue state. They report back by sending
//! [`AdapterEvent`]s over a channel that the queue runtime drains on its single
//! task, which keeps every status transition inside one critical section.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::models::{AppResult, JobSource};
use crate::core::settings::SettingsSnapshot;

/// Terminal result of one fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchOutcome {
    Success,
    Failure(String),
}

/// Messages flowing from adapters (and grace timers) back to the queue
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Progress { job_id: String, percent: f64 },
    Finished { job_id: String, outcome: FetchOutcome },
    /// Internal: cancellation grace period for a job elapsed
    GraceExpired { job_id: String },
}

pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;
pub type AdapterEventReceiver = mpsc::UnboundedReceiver<AdapterEvent>;

/// Everything an adapter needs to run one job
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: String,
    pub source: JobSource,
    pub settings: SettingsSnapshot,
}

/// Handle to an in-flight fetch
#[derive(Debug, Clone)]
pub struct FetchHandle {
    job_id: String,
    cancel: CancellationToken,
}

impl FetchHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Token the fetch should watch for stop requests
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Callback surface handed to an adapter for one job
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: String,
    sender: AdapterEventSender,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, sender: AdapterEventSender) -> Self {
        Self {
            job_id: job_id.into(),
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn progress(&self, percent: f64) {
        let _ = self.sender.send(AdapterEvent::Progress {
            job_id: self.job_id.clone(),
            percent,
        });
    }

    /// Report the terminal outcome; consumes the reporter
    pub fn complete(self, outcome: FetchOutcome) {
        let _ = self.sender.send(AdapterEvent::Finished {
            job_id: self.job_id,
            outcome,
        });
    }

    pub fn succeed(self) {
        self.complete(FetchOutcome::Success);
    }

    pub fn fail(self, error: impl Into<String>) {
        self.complete(FetchOutcome::Failure(error.into()));
    }
}

/// The wrapped downloading library.
///
/// `fetch` must return promptly; the work itself runs on a task the adapter
/// spawns. It reports zero or more progress values and then exactly one
/// completion through the reporter.
#[async_trait]
pub trait DownloadAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, request: FetchRequest, reporter: ProgressReporter) -> AppResult<FetchHandle>;

    /// Best-effort stop request; acknowledgment arrives as a completion
    fn cancel(&self, handle: &FetchHandle) {
        handle.cancel.cancel();
    }

    /// Expand a source into the individual references to enqueue
    async fn resolve_entries(&self, source: &JobSource) -> AppResult<Vec<String>> {
        Ok(vec![source.as_str().to_string()])
    }
}
