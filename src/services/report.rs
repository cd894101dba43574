//! Run result aggregation.
//!
//! Workers record outcomes concurrently; counters are atomics and the
//! failure list sits behind a mutex.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

/// One failed document, with its cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub id: String,
    pub filename: String,
    pub error: String,
}

/// Shared tally for one run.
#[derive(Debug, Default)]
pub struct RunReport {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    not_attempted: AtomicUsize,
    bytes: AtomicU64,
    failures: Mutex<Vec<FailureRecord>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, failure: FailureRecord) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        match self.failures.lock() {
            Ok(mut failures) => failures.push(failure),
            Err(poisoned) => poisoned.into_inner().push(failure),
        }
    }

    pub fn record_not_attempted(&self, count: usize) {
        self.not_attempted.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        failures.sort_by(|a, b| a.filename.cmp(&b.filename));

        RunSummary {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            not_attempted: self.not_attempted.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes.load(Ordering::Relaxed),
            elapsed,
            failures,
        }
    }
}

/// Final result of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tasks never started because the run was cancelled.
    pub not_attempted: usize,
    pub bytes_downloaded: u64,
    pub elapsed: Duration,
    /// Sorted by filename.
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    /// Tasks that reached a final state.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn docs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }

    /// Write the summary and itemized failures to the log.
    pub fn log(&self) {
        info!(
            "Download complete: {} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        );
        if self.not_attempted > 0 {
            warn!("{} documents not attempted (interrupted)", self.not_attempted);
        }
        info!(
            "Downloaded {} in {:.2}s ({:.2} docs/sec)",
            format_bytes(self.bytes_downloaded),
            self.elapsed.as_secs_f64(),
            self.docs_per_second()
        );
        for failure in &self.failures {
            warn!("Failed: {} [{}]: {}", failure.filename, failure.id, failure.error);
        }
    }
}

/// Format a byte count for humans.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
