//! Document download service.
//!
//! Turns filtered records into tasks with unique target paths and runs them
//! either one at a time or on a worker pool. Both strategies share
//! [`process_task`], so skip, retry and write behaviour is identical.
//! Separated from UI concerns - emits events for progress tracking.

mod filename;
mod types;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::report::{FailureRecord, RunReport, RunSummary};
use crate::models::DocumentRecord;
use crate::retry::with_retry;
use crate::scrapers::HttpClient;

pub use filename::{sanitize_filename, TargetPlanner, MAX_BASE_LEN};
pub use types::{
    DownloadConfig, DownloadEvent, DownloadTask, ExecutionMode, TaskError, TaskStatus,
};

/// State shared by every worker in a run.
struct TaskContext {
    config: DownloadConfig,
    report: RunReport,
    events: mpsc::Sender<DownloadEvent>,
}

/// Service for downloading a list of documents.
pub struct DownloadService {
    client: HttpClient,
    config: DownloadConfig,
    cancel: CancellationToken,
}

impl DownloadService {
    /// Create a new download service.
    pub fn new(client: HttpClient, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new tasks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build one task per record, with collision-free target paths.
    pub fn plan(&self, records: Vec<DocumentRecord>) -> Vec<DownloadTask> {
        let mut planner = TargetPlanner::new(&self.config.download_dir);
        records
            .into_iter()
            .map(|record| {
                let filename = sanitize_filename(record.filename_hint(), &self.config.extension);
                let target = planner.reserve(&filename);
                DownloadTask::new(record, target)
            })
            .collect()
    }

    /// Download `records` and return the final tally.
    ///
    /// Per-document failures are recorded in the summary, never returned.
    pub async fn run(
        &self,
        records: Vec<DocumentRecord>,
        event_tx: mpsc::Sender<DownloadEvent>,
    ) -> RunSummary {
        let started = Instant::now();
        let tasks = self.plan(records);
        let ctx = Arc::new(TaskContext {
            config: self.config.clone(),
            report: RunReport::new(),
            events: event_tx,
        });

        if let Err(e) = tokio::fs::create_dir_all(&self.config.download_dir).await {
            warn!(
                "Could not create download directory {}: {}",
                self.config.download_dir.display(),
                e
            );
        }

        info!(
            "Downloading {} documents to {} ({})",
            tasks.len(),
            self.config.download_dir.display(),
            match self.config.mode {
                ExecutionMode::Sequential => "sequential".to_string(),
                ExecutionMode::Parallel { workers } => format!("{} workers", workers),
            }
        );

        match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(tasks, &ctx).await,
            ExecutionMode::Parallel { workers } => self.run_parallel(tasks, workers, &ctx).await,
        }

        ctx.report.summary(started.elapsed())
    }

    /// A client sharing the connection pool, pacing on its own with a
    /// jittered request delay.
    fn paced_client(&self) -> HttpClient {
        let limiter = self.client.rate_limiter().fork().with_jitter(true);
        self.client.fork().with_rate_limiter(limiter)
    }

    async fn run_sequential(&self, tasks: Vec<DownloadTask>, ctx: &TaskContext) {
        let client = self.paced_client();
        let total = tasks.len();
        for (done, task) in tasks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                ctx.report.record_not_attempted(total - done);
                break;
            }
            process_task(&client, ctx, task, 0).await;
        }
    }

    async fn run_parallel(&self, tasks: Vec<DownloadTask>, workers: usize, ctx: &Arc<TaskContext>) {
        let workers = workers.max(1).min(tasks.len().max(1));
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let ctx = ctx.clone();
            let cancel = self.cancel.clone();
            let client = self.paced_client();
            // The task a worker holds, so a panic still gets counted
            let in_flight = Arc::new(Mutex::new(None::<FailureRecord>));
            let current = in_flight.clone();

            let handle = tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(task) = queue.lock().await.pop_front() else {
                        break;
                    };
                    *current.lock().await = Some(FailureRecord {
                        id: task.record.id.clone(),
                        filename: task.filename(),
                        error: "download worker panicked".to_string(),
                    });
                    process_task(&client, &ctx, task, worker_id).await;
                    *current.lock().await = None;
                }
                debug!(worker_id, "Worker finished");
            });
            handles.push((handle, in_flight));
        }

        for (handle, in_flight) in handles {
            if let Err(e) = handle.await {
                error!("Download worker panicked: {}", e);
                if let Some(lost) = in_flight.lock().await.take() {
                    ctx.report.record_failure(lost);
                }
            }
        }

        let remaining = queue.lock().await.len();
        if remaining > 0 {
            ctx.report.record_not_attempted(remaining);
        }
    }
}

/// Run one task to a terminal state and record the outcome.
async fn process_task(
    client: &HttpClient,
    ctx: &TaskContext,
    mut task: DownloadTask,
    worker_id: usize,
) -> DownloadTask {
    let filename = task.filename();

    if !ctx.config.overwrite && has_content(&task.target_path).await {
        debug!("Skipping {}: already downloaded", filename);
        task.status = TaskStatus::Skipped;
        ctx.report.record_skipped();
        let _ = ctx
            .events
            .send(DownloadEvent::Skipped {
                worker_id,
                filename,
            })
            .await;
        return task;
    }

    task.status = TaskStatus::InProgress;
    let _ = ctx
        .events
        .send(DownloadEvent::Started {
            worker_id,
            url: task.record.download_url.clone(),
            filename: filename.clone(),
        })
        .await;

    let mut attempts = 0;
    let result = {
        let record = &task.record;
        let target = task.target_path.as_path();
        let config = &ctx.config;
        with_retry(&config.retry, &filename, |attempt| {
            attempts = attempt;
            fetch_and_write(client, config, record, target)
        })
        .await
    };
    task.attempt_count = attempts;

    match result {
        Ok(bytes) => {
            task.status = TaskStatus::Succeeded;
            ctx.report.record_success(bytes);
            info!("Downloaded: {} ({} bytes)", filename, bytes);
            let _ = ctx
                .events
                .send(DownloadEvent::Completed {
                    worker_id,
                    filename,
                    bytes,
                })
                .await;
        }
        Err(e) => {
            task.status = TaskStatus::Failed;
            error!(
                "Failed to download {} after {} attempts: {}",
                filename, task.attempt_count, e
            );
            ctx.report.record_failure(FailureRecord {
                id: task.record.id.clone(),
                filename: filename.clone(),
                error: e.to_string(),
            });
            let _ = ctx
                .events
                .send(DownloadEvent::Failed {
                    worker_id,
                    filename,
                    error: e.to_string(),
                })
                .await;
        }
    }

    debug_assert!(task.status.is_terminal());
    task
}

/// One full attempt: fetch the body, then write it into place.
async fn fetch_and_write(
    client: &HttpClient,
    config: &DownloadConfig,
    record: &DocumentRecord,
    target: &Path,
) -> Result<u64, TaskError> {
    let response = client.get(&record.download_url).await?;

    if !config.expected_content_type.is_empty()
        && !response.content_type_matches(&config.expected_content_type)
    {
        warn!(
            "Unexpected content type for {}: {}",
            record.id,
            response.content_type().unwrap_or("none")
        );
    }

    write_file(target, &response.body).await?;
    Ok(response.body.len() as u64)
}

/// Write `body` next to `target` and rename it into place.
///
/// On failure the temporary file is removed and `target` is untouched.
async fn write_file(target: &Path, body: &[u8]) -> Result<(), TaskError> {
    let fs_err = |source| TaskError::Filesystem {
        path: target.to_path_buf(),
        source,
    };

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fs_err)?;
    }

    let partial = partial_path(target);
    let written = match tokio::fs::write(&partial, body).await {
        Ok(()) => tokio::fs::rename(&partial, target).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(fs_err(e));
    }
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
