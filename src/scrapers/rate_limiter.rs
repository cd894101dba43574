//! Request pacing for a single logical client.
//!
//! The portal is a shared public service; every client waits out the
//! configured delay between the end of one request and the start of the
//! next. Retries of a single request are paced by the retry policy instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::retry::jittered;

/// Enforces a minimum gap between consecutive requests from one client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    delay: Duration,
    jitter: bool,
    last_completed: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with the given gap and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: false,
            last_completed: Arc::new(Mutex::new(None)),
        }
    }

    /// Randomize each gap to between half and all of the configured delay.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A limiter with the same settings but its own timing state.
    pub fn fork(&self) -> Self {
        Self::new(self.delay).with_jitter(self.jitter)
    }

    pub fn is_jittered(&self) -> bool {
        self.jitter
    }

    /// Wait until the gap since the previous request has elapsed.
    /// Returns how long it waited.
    pub async fn acquire(&self) -> Duration {
        let last = *self.last_completed.lock().await;
        let Some(last) = last else {
            return Duration::ZERO;
        };

        let gap = if self.jitter {
            jittered(self.delay)
        } else {
            self.delay
        };
        let elapsed = last.elapsed();
        if elapsed >= gap {
            return Duration::ZERO;
        }

        let wait = gap - elapsed;
        debug!("Rate limiting: waiting {:?}", wait);
        tokio::time::sleep(wait).await;
        wait
    }

    /// Record that a request has just finished.
    pub async fn complete(&self) {
        *self.last_completed.lock().await = Some(Instant::now());
    }
}
