//! Scriptable adapter for queue tests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::adapter::{
    DownloadAdapter, FetchHandle, FetchOutcome, FetchRequest, ProgressReporter,
};
use crate::core::log_sink::LogSink;
use crate::core::manager::QueueManager;
use crate::core::models::{AppError, AppResult, JobSource, QueueConfig};
use crate::core::settings::{DownloadSettings, SettingsSnapshot};

/// How the fake reacts once a fetch has started
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeBehavior {
    /// Tests drive progress and completion through the adapter
    Manual,
    /// A spawned task reports 50%, waits, then succeeds; sources containing
    /// "fail" report an error instead
    Auto { delay: Duration },
}

pub struct FakeAdapter {
    behavior: FakeBehavior,
    /// Acknowledge cancel requests with a completion
    acknowledge_cancel: bool,
    /// Sources whose `fetch` call errors out
    refuse_sources: Vec<String>,
    /// Entries returned when a playlist is resolved
    playlist_entries: Option<Vec<String>>,
    fetched: Mutex<Vec<FetchRequest>>,
    cancelled: Mutex<Vec<String>>,
    reporters: Mutex<HashMap<String, ProgressReporter>>,
}

impl FakeAdapter {
    pub fn manual() -> Self {
        Self {
            behavior: FakeBehavior::Manual,
            acknowledge_cancel: true,
            refuse_sources: Vec::new(),
            playlist_entries: None,
            fetched: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            reporters: Mutex::new(HashMap::new()),
        }
    }

    pub fn auto(delay: Duration) -> Self {
        Self {
            behavior: FakeBehavior::Auto { delay },
            ..Self::manual()
        }
    }

    /// Never answers a cancel request
    pub fn ignoring_cancel(mut self) -> Self {
        self.acknowledge_cancel = false;
        self
    }

    pub fn refusing(mut self, source: &str) -> Self {
        self.refuse_sources.push(source.to_string());
        self
    }

    pub fn with_playlist(mut self, entries: &[&str]) -> Self {
        self.playlist_entries = Some(entries.iter().map(|e| e.to_string()).collect());
        self
    }

    /// Job ids in the order `fetch` was called
    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched.lock().iter().map(|r| r.job_id.clone()).collect()
    }

    pub fn fetched_requests(&self) -> Vec<FetchRequest> {
        self.fetched.lock().clone()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn report_progress(&self, job_id: &str, percent: f64) {
        if let Some(reporter) = self.reporters.lock().get(job_id) {
            reporter.progress(percent);
        }
    }

    /// Deliver the terminal callback for a manually driven job
    pub fn finish(&self, job_id: &str, outcome: FetchOutcome) {
        if let Some(reporter) = self.reporters.lock().remove(job_id) {
            reporter.complete(outcome);
        }
    }
}

#[async_trait::async_trait]
impl DownloadAdapter for FakeAdapter {
    fn name(&self) -> &str {
        "fake"
    }

    fn fetch(&self, request: FetchRequest, reporter: ProgressReporter) -> AppResult<FetchHandle> {
        if self
            .refuse_sources
            .iter()
            .any(|s| s == request.source.as_str())
        {
            return Err(AppError::Adapter(format!(
                "refused to start {}",
                request.source
            )));
        }

        let handle = FetchHandle::new(request.job_id.clone());
        let failing = request.source.as_str().contains("fail");
        self.fetched.lock().push(request);

        match self.behavior {
            FakeBehavior::Manual => {
                self.reporters
                    .lock()
                    .insert(reporter.job_id().to_string(), reporter);
            }
            FakeBehavior::Auto { delay } => {
                let token = handle.cancellation_token();
                let acknowledge = self.acknowledge_cancel;
                tokio::spawn(async move {
                    reporter.progress(50.0);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            if failing {
                                reporter.fail("HTTP Error 404: Not Found");
                            } else {
                                reporter.progress(100.0);
                                reporter.succeed();
                            }
                        }
                        _ = token.cancelled(), if acknowledge => {
                            reporter.fail("cancelled");
                        }
                    }
                });
            }
        }

        Ok(handle)
    }

    fn cancel(&self, handle: &FetchHandle) {
        self.cancelled.lock().push(handle.job_id().to_string());
        handle.cancellation_token().cancel();

        if self.acknowledge_cancel && self.behavior == FakeBehavior::Manual {
            self.finish(handle.job_id(), FetchOutcome::Failure("cancelled".into()));
        }
    }

    async fn resolve_entries(&self, source: &JobSource) -> AppResult<Vec<String>> {
        match &self.playlist_entries {
            Some(entries) if source.is_playlist() => return Ok(entries.clone()),
            _ => {}
        }
        Ok(vec![source.as_str().to_string()])
    }
}

pub fn test_config(concurrency_limit: usize) -> QueueConfig {
    QueueConfig {
        concurrency_limit,
        cancel_grace_period_ms: 20,
        auto_start: false,
    }
}

pub fn default_snapshot() -> SettingsSnapshot {
    DownloadSettings::default().snapshot()
}

/// Manager wired to a fake adapter; the receiver must be pumped by the test
pub fn manager_with(
    config: QueueConfig,
    adapter: Arc<FakeAdapter>,
) -> (QueueManager, crate::core::adapter::AdapterEventReceiver) {
    QueueManager::new(config, adapter, Arc::new(LogSink::default()))
}
