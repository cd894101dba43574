//! Download service types and events.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::Settings;
use crate::models::DocumentRecord;
use crate::retry::{IsRetryable, RetryPolicy};
use crate::scrapers::FetchError;

/// Events emitted during download operations.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Download started for a document
    Started {
        worker_id: usize,
        url: String,
        filename: String,
    },
    /// Body received and written
    Completed {
        worker_id: usize,
        filename: String,
        bytes: u64,
    },
    /// Target already on disk, nothing fetched
    Skipped { worker_id: usize, filename: String },
    /// Retry budget exhausted or file could not be written
    Failed {
        worker_id: usize,
        filename: String,
        error: String,
    },
}

/// Lifecycle of a single download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// A non-empty file was already at the target path.
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// One document to download.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub record: DocumentRecord,
    /// Sanitized, unique within the run.
    pub target_path: PathBuf,
    /// Fetch-and-write attempts made so far.
    pub attempt_count: u32,
    pub status: TaskStatus,
}

impl DownloadTask {
    pub fn new(record: DocumentRecord, target_path: PathBuf) -> Self {
        Self {
            record,
            target_path,
            attempt_count: 0,
            status: TaskStatus::Pending,
        }
    }

    /// Filename shown in logs and progress output.
    pub fn filename(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.record.id.clone())
    }
}

/// Why a task failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IsRetryable for TaskError {
    /// Any fetch failure gets another full attempt; a write failure will
    /// not fix itself.
    fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fetch(_))
    }
}

/// How tasks are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One task at a time, in list order.
    Sequential,
    /// A fixed pool of workers pulling from a shared queue.
    Parallel { workers: usize },
}

impl ExecutionMode {
    pub fn worker_count(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { workers } => workers.max(1),
        }
    }
}

/// Configuration for download service.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub extension: String,
    pub overwrite: bool,
    /// Logged when a body's content type does not contain this; empty disables.
    pub expected_content_type: String,
    /// Task-level retries, on top of the client's per-request retries.
    pub retry: RetryPolicy,
    pub mode: ExecutionMode,
}

impl DownloadConfig {
    pub fn from_settings(settings: &Settings, mode: ExecutionMode) -> Self {
        Self {
            download_dir: settings.download_dir.clone(),
            extension: settings.default_extension.clone(),
            overwrite: settings.overwrite,
            expected_content_type: settings.expected_content_type.clone(),
            retry: RetryPolicy {
                jitter: true,
                ..RetryPolicy::from_attempts(settings.retry_attempts, settings.retry_base_delay)
            },
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_from_settings_uses_jittered_task_retries() {
        let settings = Settings {
            retry_attempts: 4,
            retry_base_delay: Duration::from_millis(250),
            ..Settings::default()
        };
        let config = DownloadConfig::from_settings(&settings, ExecutionMode::Parallel { workers: 3 });

        assert!(config.retry.jitter);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.mode.worker_count(), 3);
    }
}
