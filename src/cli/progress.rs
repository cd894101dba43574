//! Multi-progress display for concurrent downloads.
//!
//! Also provides a global progress context so log output printed while
//! bars are drawn does not corrupt them.

use std::io;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use councildocs::services::DownloadEvent;

/// Global reference to active progress display for coordinating output.
static ACTIVE_PROGRESS: OnceLock<RwLock<Option<MultiProgress>>> = OnceLock::new();

fn get_active_progress() -> &'static RwLock<Option<MultiProgress>> {
    ACTIVE_PROGRESS.get_or_init(|| RwLock::new(None))
}

/// Set the global active progress display.
pub fn set_active_progress(multi: Option<MultiProgress>) {
    if let Ok(mut guard) = get_active_progress().write() {
        *guard = multi;
    }
}

/// Print a line to stderr above any active progress display.
pub fn progress_eprintln(message: &str) {
    if let Ok(guard) = get_active_progress().read() {
        if let Some(ref multi) = *guard {
            if !multi.is_hidden() {
                let _ = multi.println(message);
                return;
            }
        }
    }
    eprintln!("{}", message);
}

/// `tracing` writer that routes each event through [`progress_eprintln`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressAwareWriter;

/// Buffers one formatted event and prints it when dropped.
pub struct EventLine(Vec<u8>);

impl io::Write for EventLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventLine {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            let line = String::from_utf8_lossy(&self.0);
            progress_eprintln(line.trim_end_matches('\n'));
        }
    }
}

impl<'a> MakeWriter<'a> for ProgressAwareWriter {
    type Writer = EventLine;

    fn make_writer(&'a self) -> Self::Writer {
        EventLine(Vec::new())
    }
}

/// Manages one progress line per worker plus a summary bar.
pub struct DownloadProgress {
    slots: Mutex<Vec<ProgressBar>>,
    summary_bar: ProgressBar,
}

impl DownloadProgress {
    /// Create a new download progress display with the given number of worker slots.
    pub fn new(num_workers: usize, total: u64) -> Self {
        let multi = MultiProgress::new();

        let summary_bar = multi.add(ProgressBar::new(total));
        summary_bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        summary_bar.set_message("Downloading");

        let slots = (0..num_workers.max(1))
            .map(|_| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(idle_style());
                bar.set_message("idle");
                bar
            })
            .collect();

        // Register as active progress display for coordinated output
        set_active_progress(Some(multi));

        Self {
            slots: Mutex::new(slots),
            summary_bar,
        }
    }

    /// Show `filename` on the worker's line.
    pub async fn start_download(&self, worker_id: usize, filename: &str) {
        let slots = self.slots.lock().await;
        if let Some(bar) = slots.get(worker_id) {
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.cyan} {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_message(truncate_filename(filename, 50));
            bar.enable_steady_tick(Duration::from_millis(100));
        }
    }

    /// Return the worker's line to idle and count the document.
    pub async fn finish_download(&self, worker_id: usize) {
        let slots = self.slots.lock().await;
        if let Some(bar) = slots.get(worker_id) {
            bar.disable_steady_tick();
            bar.set_style(idle_style());
            bar.set_message("idle");
        }
        self.summary_bar.inc(1);
    }

    pub fn set_summary(&self, downloaded: usize, skipped: usize, failed: usize) {
        self.summary_bar.set_message(format!(
            "Downloaded: {} | Skipped: {} | Failed: {}",
            downloaded, skipped, failed
        ));
    }

    /// Finish all progress bars and clear the display.
    pub async fn finish(&self) {
        let slots = self.slots.lock().await;
        for bar in slots.iter() {
            bar.finish_and_clear();
        }
        self.summary_bar.finish_and_clear();

        set_active_progress(None);
    }
}

fn idle_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.dim} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Drive the display from service events until the channel closes.
pub async fn handle_events(
    mut event_rx: mpsc::Receiver<DownloadEvent>,
    progress: Option<Arc<DownloadProgress>>,
) {
    let mut downloaded = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    while let Some(event) = event_rx.recv().await {
        let Some(ref progress) = progress else {
            continue;
        };
        match event {
            DownloadEvent::Started {
                worker_id,
                filename,
                ..
            } => progress.start_download(worker_id, &filename).await,
            DownloadEvent::Completed { worker_id, .. } => {
                downloaded += 1;
                progress.set_summary(downloaded, skipped, failed);
                progress.finish_download(worker_id).await;
            }
            DownloadEvent::Skipped { worker_id, .. } => {
                skipped += 1;
                progress.set_summary(downloaded, skipped, failed);
                progress.finish_download(worker_id).await;
            }
            DownloadEvent::Failed { worker_id, .. } => {
                failed += 1;
                progress.set_summary(downloaded, skipped, failed);
                progress.finish_download(worker_id).await;
            }
        }
    }
}

/// Truncate a filename for display, keeping the extension visible.
fn truncate_filename(name: &str, max_len: usize) -> String {
    let len = name.chars().count();
    if len <= max_len {
        return name.to_string();
    }

    if let Some(dot_pos) = name.rfind('.') {
        let ext = &name[dot_pos..];
        let ext_len = ext.chars().count();
        if ext_len + 4 < max_len {
            let prefix: String = name.chars().take(max_len - ext_len - 3).collect();
            return format!("{}...{}", prefix, ext);
        }
    }

    let prefix: String = name.chars().take(max_len - 3).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_filename() {
        assert_eq!(truncate_filename("short.pdf", 20), "short.pdf");
        assert_eq!(
            truncate_filename("a_very_long_filename_that_needs_truncation.pdf", 25),
            "a_very_long_filena....pdf"
        );
        assert_eq!(truncate_filename("no_extension", 8), "no_ex...");
        assert_eq!(truncate_filename("ééééééééééé.pdf", 10), "ééé....pdf");
    }
}
