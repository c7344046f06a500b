//! Download Queue Manager - admission, bounded concurrency and job lifecycle
//!
//! The manager is a plain state machine: every method takes `&mut self` and
//! never awaits. The runtime router (`core::runtime`) owns it on a single task
//! and feeds it user commands and adapter events one at a time, so status
//! transitions, slot accounting and FIFO admission form one critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::adapter::{
    AdapterEvent, AdapterEventReceiver, AdapterEventSender, DownloadAdapter, FetchHandle,
    FetchOutcome, FetchRequest, ProgressReporter,
};
use crate::core::log_sink::{LogLevel, LogSink};
use crate::core::models::{
    AppError, AppResult, DownloadJob, JobSource, JobStatus, QueueConfig, QueueStats,
};
use crate::core::settings::SettingsSnapshot;

/// Notifications for front ends
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum QueueEvent {
    JobQueued {
        job: DownloadJob,
    },
    JobStarted {
        job_id: String,
    },
    JobProgress {
        job_id: String,
        percent: f64,
    },
    JobCompleted {
        job_id: String,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    JobCancelled {
        job_id: String,
        /// The adapter never acknowledged and the grace period ran out
        forced: bool,
    },
    JobRemoved {
        job_id: String,
    },
    StatsUpdated {
        stats: QueueStats,
    },
}

pub type EventSender = mpsc::UnboundedSender<QueueEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<QueueEvent>;

/// Progress milestones written to the log sink
const PROGRESS_MILESTONES: [f64; 3] = [25.0, 50.0, 75.0];

/// Bookkeeping for a job occupying a worker slot
struct ActiveSlot {
    handle: FetchHandle,
    cancel_requested_at: Option<Instant>,
}

pub struct QueueManager {
    config: QueueConfig,

    adapter: Arc<dyn DownloadAdapter>,

    /// All jobs by id
    jobs: HashMap<String, DownloadJob>,

    /// Job ids in enqueue order, for listing
    order: Vec<String>,

    /// Pending job ids awaiting a slot, oldest first
    pending: VecDeque<String>,

    /// Jobs currently holding a slot
    active: HashMap<String, ActiveSlot>,

    next_sequence: u64,

    /// Admission is enabled once `start_all` has been called
    is_running: bool,

    /// Cloned into every reporter and grace timer
    events_tx: AdapterEventSender,

    subscribers: Vec<EventSender>,

    log_sink: Arc<LogSink>,

    stats: QueueStats,
}

impl QueueManager {
    /// Create a manager plus the receiving end of its adapter event channel.
    /// Whoever owns the manager must drain the receiver into
    /// [`QueueManager::handle_adapter_event`].
    pub fn new(
        config: QueueConfig,
        adapter: Arc<dyn DownloadAdapter>,
        log_sink: Arc<LogSink>,
    ) -> (Self, AdapterEventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let config = QueueConfig {
            concurrency_limit: config.concurrency_limit.max(1),
            ..config
        };

        info!(
            "Created queue manager (adapter: {}, concurrency limit: {})",
            adapter.name(),
            config.concurrency_limit
        );

        let manager = Self {
            config,
            adapter,
            jobs: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            next_sequence: 0,
            is_running: false,
            events_tx,
            subscribers: Vec::new(),
            log_sink,
            stats: QueueStats::default(),
        };
        (manager, events_rx)
    }

    /// Validate `source` and append a Pending job carrying `settings`
    pub fn enqueue(&mut self, source: &str, settings: SettingsSnapshot) -> AppResult<String> {
        let source = match JobSource::parse(source) {
            Ok(source) => source,
            Err(e) => {
                self.log_sink.warning(None, format!("Rejected source: {}", e));
                return Err(e);
            }
        };
        settings.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let job = DownloadJob::new(job_id.clone(), sequence, source, settings);
        self.log_sink
            .info(Some(&job_id), format!("Added to queue: {}", job.source));

        self.jobs.insert(job_id.clone(), job.clone());
        self.order.push(job_id.clone());
        self.pending.push_back(job_id.clone());

        self.emit(QueueEvent::JobQueued { job });
        self.refresh_stats();

        if self.is_running {
            self.fill_slots();
        }

        Ok(job_id)
    }

    /// Enable admission and top up free slots. Returns how many jobs were
    /// admitted by this call.
    pub fn start_all(&mut self) -> usize {
        if !self.is_running {
            self.is_running = true;
            self.log_sink.info(
                None,
                format!(
                    "Queue started with {} slots",
                    self.config.concurrency_limit
                ),
            );
        }

        let admitted = self.fill_slots();
        debug!(
            "start_all admitted {} jobs ({} active, {} pending)",
            admitted,
            self.active.len(),
            self.pending.len()
        );
        admitted
    }

    /// Stop admitting new jobs. Active jobs keep running.
    pub fn stop(&mut self) {
        if self.is_running {
            self.is_running = false;
            self.log_sink.info(None, "Queue stopped; active jobs will finish");
        }
    }

    /// Cancel a Pending job immediately, or ask the adapter to stop an Active
    /// one. An Active job becomes Cancelled on acknowledgment or when the
    /// grace period runs out, whichever happens first.
    pub fn cancel(&mut self, job_id: &str) -> AppResult<()> {
        let status = self.status_of(job_id)?;

        match status {
            JobStatus::Pending => {
                self.pending.retain(|id| id != job_id);
                self.transition(job_id, JobStatus::Cancelled, None);
                self.log_sink.info(Some(job_id), "Cancelled before start");
                self.emit(QueueEvent::JobCancelled {
                    job_id: job_id.to_string(),
                    forced: false,
                });
                self.refresh_stats();
                Ok(())
            }
            JobStatus::Active => {
                let grace = self.config.cancel_grace_period();
                let slot = self.active.get_mut(job_id).ok_or_else(|| {
                    AppError::System(format!("active job {} has no worker slot", job_id))
                })?;

                if slot.cancel_requested_at.is_some() {
                    debug!("Cancellation already requested for {}", job_id);
                    return Ok(());
                }

                slot.cancel_requested_at = Some(Instant::now());
                self.adapter.cancel(&slot.handle);
                self.log_sink.info(
                    Some(job_id),
                    format!("Cancellation requested (grace period {:?})", grace),
                );
                self.schedule_grace_timer(job_id, grace);
                Ok(())
            }
            terminal => Err(AppError::InvalidState(format!(
                "job {} is already {}",
                job_id, terminal
            ))),
        }
    }

    /// Cancel every non-terminal job; returns how many were affected
    pub fn cancel_all(&mut self) -> usize {
        let pending: Vec<String> = self.pending.iter().cloned().collect();
        let active: Vec<String> = self.active.keys().cloned().collect();

        let mut cancelled = 0usize;
        for job_id in pending.iter().chain(active.iter()) {
            match self.cancel(job_id) {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("Failed to cancel job {}: {}", job_id, e),
            }
        }

        info!("Cancelled {} jobs", cancelled);
        cancelled
    }

    /// Drop a terminal job from the queue
    pub fn remove(&mut self, job_id: &str) -> AppResult<DownloadJob> {
        let status = self.status_of(job_id)?;
        if !status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "cannot remove job {} while it is {}",
                job_id, status
            )));
        }

        let job = self
            .jobs
            .remove(job_id)
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))?;
        self.order.retain(|id| id != job_id);

        debug!("Removed job {}", job_id);
        self.emit(QueueEvent::JobRemoved {
            job_id: job_id.to_string(),
        });
        self.refresh_stats();
        Ok(job)
    }

    /// Remove every terminal job
    pub fn clear_finished(&mut self) -> usize {
        let finished: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                self.jobs
                    .get(id.as_str())
                    .is_some_and(|job| job.status.is_terminal())
            })
            .cloned()
            .collect();

        let removed = finished
            .iter()
            .filter(|id| self.remove(id).is_ok())
            .count();

        if removed > 0 {
            self.log_sink
                .info(None, format!("Cleared {} finished jobs", removed));
        }
        removed
    }

    /// Re-enqueue a Failed or Cancelled job with the same source and settings
    pub fn retry(&mut self, job_id: &str) -> AppResult<String> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))?;

        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(AppError::InvalidState(format!(
                "only failed or cancelled jobs can be retried; {} is {}",
                job_id, job.status
            )));
        }

        let source = job.source.as_str().to_string();
        let settings = Arc::clone(&job.settings);
        let new_id = self.enqueue(&source, settings)?;
        self.log_sink
            .info(Some(job_id), format!("Retrying as job {}", new_id));
        Ok(new_id)
    }

    /// Adjust the slot count. Lowering it never interrupts running jobs; the
    /// queue simply admits nothing until it drains below the new limit.
    pub fn set_concurrency_limit(&mut self, limit: usize) {
        let limit = limit.max(1);
        if limit == self.config.concurrency_limit {
            return;
        }
        info!(
            "Updated concurrency limit: {} -> {}",
            self.config.concurrency_limit, limit
        );
        self.config.concurrency_limit = limit;
        if self.is_running {
            self.fill_slots();
        }
    }

    /// Adapter progress callback. Values are clamped to [0, 100] and only
    /// forwarded when they increase the job's recorded progress.
    pub fn on_progress(&mut self, job_id: &str, percent: f64) {
        if percent.is_nan() {
            debug!("Ignoring NaN progress for {}", job_id);
            return;
        }

        match self.active.get(job_id) {
            None => {
                debug!("Ignoring progress for job {} which is not active", job_id);
                return;
            }
            Some(slot) if slot.cancel_requested_at.is_some() => return,
            Some(_) => {}
        }

        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        let clamped = percent.clamp(0.0, 100.0);
        if clamped <= job.progress {
            return;
        }

        let previous = job.progress;
        job.progress = clamped;
        job.updated_at = chrono::Utc::now();

        for milestone in PROGRESS_MILESTONES
            .iter()
            .filter(|m| previous < **m && clamped >= **m)
        {
            self.log_sink
                .log(LogLevel::Debug, Some(job_id), format!("{}% downloaded", milestone));
        }

        self.emit(QueueEvent::JobProgress {
            job_id: job_id.to_string(),
            percent: clamped,
        });
    }

    /// Adapter completion callback. Frees the slot and admits the next job.
    pub fn on_complete(&mut self, job_id: &str, outcome: FetchOutcome) {
        let Some(slot) = self.active.remove(job_id) else {
            debug!("Ignoring completion for job {} which is not active", job_id);
            return;
        };

        if slot.cancel_requested_at.is_some() {
            self.transition(job_id, JobStatus::Cancelled, None);
            self.log_sink.info(Some(job_id), "Cancelled");
            self.emit(QueueEvent::JobCancelled {
                job_id: job_id.to_string(),
                forced: false,
            });
        } else {
            match outcome {
                FetchOutcome::Success => {
                    self.transition(job_id, JobStatus::Completed, None);
                    self.log_sink.success(Some(job_id), "Download completed");
                    self.emit(QueueEvent::JobCompleted {
                        job_id: job_id.to_string(),
                    });
                }
                FetchOutcome::Failure(error) => {
                    self.transition(job_id, JobStatus::Failed, Some(error.clone()));
                    self.log_sink
                        .error(Some(job_id), format!("Download failed: {}", error));
                    self.emit(QueueEvent::JobFailed {
                        job_id: job_id.to_string(),
                        error,
                    });
                }
            }
        }

        self.refresh_stats();
        if self.is_running {
            self.fill_slots();
        }
    }

    /// Force-cancel a job whose adapter ignored the stop request
    pub fn on_grace_expired(&mut self, job_id: &str) {
        let requested_at = match self.active.get(job_id) {
            Some(slot) => slot.cancel_requested_at,
            None => return,
        };
        let Some(requested_at) = requested_at else {
            return;
        };

        self.active.remove(job_id);
        let timeout = AppError::CancellationTimeout {
            job_id: job_id.to_string(),
            grace_ms: self.config.cancel_grace_period_ms,
        };
        warn!(
            "{} (waited {:?}); reclaiming slot",
            timeout,
            requested_at.elapsed()
        );
        self.log_sink
            .warning(Some(job_id), format!("{}; forced cancellation", timeout));

        self.transition(job_id, JobStatus::Cancelled, None);
        self.emit(QueueEvent::JobCancelled {
            job_id: job_id.to_string(),
            forced: true,
        });

        self.refresh_stats();
        if self.is_running {
            self.fill_slots();
        }
    }

    /// Dispatch one message from the adapter channel
    pub fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Progress { job_id, percent } => self.on_progress(&job_id, percent),
            AdapterEvent::Finished { job_id, outcome } => self.on_complete(&job_id, outcome),
            AdapterEvent::GraceExpired { job_id } => self.on_grace_expired(&job_id),
        }
    }

    /// New notification stream receiving every subsequent event
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Snapshot of all jobs in enqueue order
    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect()
    }

    pub fn job(&self, job_id: &str) -> Option<&DownloadJob> {
        self.jobs.get(job_id)
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn adapter(&self) -> Arc<dyn DownloadAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn log_sink(&self) -> Arc<LogSink> {
        Arc::clone(&self.log_sink)
    }

    // Private helpers

    fn status_of(&self, job_id: &str) -> AppResult<JobStatus> {
        self.jobs
            .get(job_id)
            .map(|job| job.status)
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))
    }

    /// Admit Pending jobs in FIFO order until every slot is taken
    fn fill_slots(&mut self) -> usize {
        let mut admitted = 0usize;
        while self.active.len() < self.config.concurrency_limit {
            let Some(job_id) = self.pending.pop_front() else {
                break;
            };
            if self.admit(&job_id) {
                admitted += 1;
            }
        }
        admitted
    }

    fn admit(&mut self, job_id: &str) -> bool {
        let request = match self.jobs.get(job_id) {
            Some(job) if job.status == JobStatus::Pending => FetchRequest {
                job_id: job_id.to_string(),
                source: job.source.clone(),
                settings: Arc::clone(&job.settings),
            },
            _ => return false,
        };
        let target = request.source.to_string();
        let reporter = ProgressReporter::new(job_id, self.events_tx.clone());

        let fetch = self.adapter.fetch(request, reporter);

        self.transition(job_id, JobStatus::Active, None);
        self.emit(QueueEvent::JobStarted {
            job_id: job_id.to_string(),
        });

        match fetch {
            Ok(handle) => {
                self.active.insert(
                    job_id.to_string(),
                    ActiveSlot {
                        handle,
                        cancel_requested_at: None,
                    },
                );
                self.log_sink
                    .info(Some(job_id), format!("Starting download: {}", target));
                self.refresh_stats();
                true
            }
            Err(e) => {
                let error = e.to_string();
                self.transition(job_id, JobStatus::Failed, Some(error.clone()));
                self.log_sink
                    .error(Some(job_id), format!("Could not start download: {}", error));
                self.emit(QueueEvent::JobFailed {
                    job_id: job_id.to_string(),
                    error,
                });
                self.refresh_stats();
                false
            }
        }
    }

    /// Apply a lifecycle transition; invalid transitions are logged and skipped
    fn transition(&mut self, job_id: &str, next: JobStatus, error: Option<String>) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            warn!("Transition to {} requested for unknown job {}", next, job_id);
            return false;
        };

        if !job.status.can_transition_to(next) {
            warn!(
                "Rejected transition {} -> {} for job {}",
                job.status, next, job_id
            );
            return false;
        }

        let now = chrono::Utc::now();
        job.status = next;
        job.updated_at = now;
        match next {
            JobStatus::Active => {
                job.started_at = Some(now);
                job.progress = 0.0;
            }
            JobStatus::Completed => {
                job.progress = 100.0;
                job.finished_at = Some(now);
            }
            JobStatus::Failed => {
                job.error = error;
                job.finished_at = Some(now);
            }
            JobStatus::Cancelled => {
                job.finished_at = Some(now);
            }
            JobStatus::Pending => {}
        }
        true
    }

    fn schedule_grace_timer(&mut self, job_id: &str, grace: Duration) {
        let sender = self.events_tx.clone();
        let timer_job_id = job_id.to_string();

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = sender.send(AdapterEvent::GraceExpired {
                        job_id: timer_job_id,
                    });
                });
            }
            Err(_) => {
                warn!(
                    "No tokio runtime for the cancellation timer; forcing cancellation of {}",
                    job_id
                );
                self.on_grace_expired(job_id);
            }
        }
    }

    fn emit(&mut self, event: QueueEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn refresh_stats(&mut self) {
        let mut stats = QueueStats {
            total_jobs: self.jobs.len(),
            ..QueueStats::default()
        };
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Active => stats.active_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Cancelled => stats.cancelled_jobs += 1,
            }
        }

        if stats != self.stats {
            self.stats = stats;
            self.emit(QueueEvent::StatsUpdated {
                stats: self.stats.clone(),
            });
        }
    }
}
