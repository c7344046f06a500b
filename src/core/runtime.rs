//! Queue runtime command router.
//!
//! A single task owns the [`QueueManager`] and processes user commands and
//! adapter events strictly one after another. Front ends talk to it through a
//! cloneable [`QueueRuntimeHandle`].

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::core::adapter::{AdapterEventReceiver, DownloadAdapter};
use crate::core::manager::{EventReceiver, QueueEvent, QueueManager};
use crate::core::models::{AppError, AppResult, DownloadJob, JobSource, QueueStats};
use crate::core::settings::SettingsSnapshot;

/// Commands understood by the runtime router.
#[derive(Debug)]
pub enum RuntimeCommand {
    Enqueue {
        source: String,
        settings: SettingsSnapshot,
        respond_to: oneshot::Sender<AppResult<String>>,
    },
    StartAll {
        respond_to: oneshot::Sender<usize>,
    },
    Stop {
        respond_to: oneshot::Sender<()>,
    },
    Cancel {
        job_id: String,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    CancelAll {
        respond_to: oneshot::Sender<usize>,
    },
    Remove {
        job_id: String,
        respond_to: oneshot::Sender<AppResult<DownloadJob>>,
    },
    Retry {
        job_id: String,
        respond_to: oneshot::Sender<AppResult<String>>,
    },
    ClearFinished {
        respond_to: oneshot::Sender<usize>,
    },
    SetConcurrency {
        limit: usize,
        respond_to: oneshot::Sender<()>,
    },
    Jobs {
        respond_to: oneshot::Sender<Vec<DownloadJob>>,
    },
    Stats {
        respond_to: oneshot::Sender<QueueStats>,
    },
    Subscribe {
        respond_to: oneshot::Sender<EventReceiver>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle exposed to front ends and the rest of the backend.
#[derive(Clone)]
pub struct QueueRuntimeHandle {
    sender: mpsc::Sender<RuntimeCommand>,
    adapter: Arc<dyn DownloadAdapter>,
}

impl QueueRuntimeHandle {
    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| AppError::System(format!("Queue runtime unavailable: {}", e)))?;
        rx.await
            .map_err(|_| AppError::System("Queue runtime dropped response".into()))
    }

    pub async fn enqueue(&self, source: String, settings: SettingsSnapshot) -> AppResult<String> {
        self.send_command(|tx| RuntimeCommand::Enqueue {
            source,
            settings,
            respond_to: tx,
        })
        .await?
    }

    /// Enqueue a source after letting the adapter expand it (playlists become
    /// one job per entry). Expansion runs on the caller's task, outside the
    /// router, so a slow lookup never stalls the queue.
    pub async fn enqueue_resolved(
        &self,
        source: &str,
        settings: SettingsSnapshot,
    ) -> AppResult<Vec<String>> {
        let parsed = JobSource::parse(source)?;
        let entries = if parsed.is_playlist() {
            info!("Fetching entries from playlist: {}", parsed);
            let entries = self.adapter.resolve_entries(&parsed).await?;
            if entries.is_empty() {
                warn!("No entries found in playlist: {}", parsed);
            }
            entries
        } else {
            vec![parsed.as_str().to_string()]
        };

        let mut job_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.enqueue(entry.clone(), Arc::clone(&settings)).await {
                Ok(job_id) => job_ids.push(job_id),
                Err(AppError::InvalidSource(reason)) => {
                    warn!("Skipping playlist entry {}: {}", entry, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(job_ids)
    }

    pub async fn start_all(&self) -> AppResult<usize> {
        self.send_command(|tx| RuntimeCommand::StartAll { respond_to: tx })
            .await
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.send_command(|tx| RuntimeCommand::Stop { respond_to: tx })
            .await
    }

    pub async fn cancel(&self, job_id: String) -> AppResult<()> {
        self.send_command(|tx| RuntimeCommand::Cancel {
            job_id,
            respond_to: tx,
        })
        .await?
    }

    pub async fn cancel_all(&self) -> AppResult<usize> {
        self.send_command(|tx| RuntimeCommand::CancelAll { respond_to: tx })
            .await
    }

    pub async fn remove(&self, job_id: String) -> AppResult<DownloadJob> {
        self.send_command(|tx| RuntimeCommand::Remove {
            job_id,
            respond_to: tx,
        })
        .await?
    }

    pub async fn retry(&self, job_id: String) -> AppResult<String> {
        self.send_command(|tx| RuntimeCommand::Retry {
            job_id,
            respond_to: tx,
        })
        .await?
    }

    pub async fn clear_finished(&self) -> AppResult<usize> {
        self.send_command(|tx| RuntimeCommand::ClearFinished { respond_to: tx })
            .await
    }

    pub async fn set_concurrency_limit(&self, limit: usize) -> AppResult<()> {
        self.send_command(|tx| RuntimeCommand::SetConcurrency {
            limit,
            respond_to: tx,
        })
        .await
    }

    pub async fn jobs(&self) -> AppResult<Vec<DownloadJob>> {
        self.send_command(|tx| RuntimeCommand::Jobs { respond_to: tx })
            .await
    }

    pub async fn stats(&self) -> AppResult<QueueStats> {
        self.send_command(|tx| RuntimeCommand::Stats { respond_to: tx })
            .await
    }

    pub async fn subscribe(&self) -> AppResult<EventReceiver> {
        self.send_command(|tx| RuntimeCommand::Subscribe { respond_to: tx })
            .await
    }

    /// Resolve once nothing is Pending or Active
    pub async fn wait_until_idle(&self) -> AppResult<QueueStats> {
        let mut events = self.subscribe().await?;
        let stats = self.stats().await?;
        if stats.is_idle() {
            return Ok(stats);
        }

        while let Some(event) = events.recv().await {
            if let QueueEvent::StatsUpdated { stats } = event {
                if stats.is_idle() {
                    return Ok(stats);
                }
            }
        }
        Err(AppError::System(
            "Queue runtime stopped before the queue drained".into(),
        ))
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.send_command(|tx| RuntimeCommand::Shutdown { respond_to: tx })
            .await
    }
}

/// Spawn the router loop on the current tokio runtime.
pub fn spawn_queue_runtime(
    manager: QueueManager,
    adapter_events: AdapterEventReceiver,
) -> AppResult<QueueRuntimeHandle> {
    let runtime = Handle::try_current()
        .map_err(|e| AppError::System(format!("No tokio runtime for the queue: {}", e)))?;

    let (tx, rx) = mpsc::channel(256);
    let adapter = manager.adapter();

    runtime.spawn(router_loop(manager, rx, adapter_events));
    info!("[RUNTIME] Queue router spawned");

    Ok(QueueRuntimeHandle {
        sender: tx,
        adapter,
    })
}

async fn router_loop(
    mut manager: QueueManager,
    mut commands: mpsc::Receiver<RuntimeCommand>,
    mut adapter_events: AdapterEventReceiver,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RuntimeCommand::Shutdown { respond_to }) => {
                    let cancelled = manager.cancel_all();
                    debug!("[RUNTIME] Shutdown requested, cancelled {} jobs", cancelled);
                    let _ = respond_to.send(());
                    break;
                }
                Some(command) => handle_command(&mut manager, command),
                None => {
                    debug!("[RUNTIME] Command channel closed, exiting router loop");
                    break;
                }
            },
            Some(event) = adapter_events.recv() => {
                manager.handle_adapter_event(event);
            }
        }
    }
}

#[instrument(skip(manager, command), fields(?command))]
fn handle_command(manager: &mut QueueManager, command: RuntimeCommand) {
    match command {
        RuntimeCommand::Enqueue {
            source,
            settings,
            respond_to,
        } => {
            let _ = respond_to.send(manager.enqueue(&source, settings));
        }
        RuntimeCommand::StartAll { respond_to } => {
            let _ = respond_to.send(manager.start_all());
        }
        RuntimeCommand::Stop { respond_to } => {
            manager.stop();
            let _ = respond_to.send(());
        }
        RuntimeCommand::Cancel { job_id, respond_to } => {
            let _ = respond_to.send(manager.cancel(&job_id));
        }
        RuntimeCommand::CancelAll { respond_to } => {
            let _ = respond_to.send(manager.cancel_all());
        }
        RuntimeCommand::Remove { job_id, respond_to } => {
            let _ = respond_to.send(manager.remove(&job_id));
        }
        RuntimeCommand::Retry { job_id, respond_to } => {
            let _ = respond_to.send(manager.retry(&job_id));
        }
        RuntimeCommand::ClearFinished { respond_to } => {
            let _ = respond_to.send(manager.clear_finished());
        }
        RuntimeCommand::SetConcurrency { limit, respond_to } => {
            manager.set_concurrency_limit(limit);
            let _ = respond_to.send(());
        }
        RuntimeCommand::Jobs { respond_to } => {
            let _ = respond_to.send(manager.jobs());
        }
        RuntimeCommand::Stats { respond_to } => {
            let _ = respond_to.send(manager.stats());
        }
        RuntimeCommand::Subscribe { respond_to } => {
            let _ = respond_to.send(manager.subscribe());
        }
        RuntimeCommand::Shutdown { respond_to } => {
            let _ = respond_to.send(());
        }
    }
}
