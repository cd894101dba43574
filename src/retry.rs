//! Retry logic with exponential backoff.
//!
//! Used twice over: the HTTP client retries a single request, and the download
//! orchestrator retries a whole fetch-and-write task. Both go through
//! [`with_retry`] so the two layers log and back off the same way.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Classifies errors as transient (worth retrying) or permanent.
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again.
    fn is_retryable(&self) -> bool;
}

/// Backoff policy for [`with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy for `attempts` total tries starting at `initial_delay`.
    pub fn from_attempts(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries: attempts.saturating_sub(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    ///
    /// Clamped to `max_delay` before conversion, so large retry counts
    /// saturate instead of overflowing `Duration`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Scale a delay by a random factor in [0.5, 1.0].
pub fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// retries are used up. Returns the last error in the latter two cases.
///
/// `label` identifies the operation in log output.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retry = 0;

    loop {
        match operation(retry + 1).await {
            Ok(result) => {
                if retry > 0 {
                    tracing::debug!(target_op = label, attempts = retry + 1, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                let delay = if policy.jitter { jittered(delay) } else { delay };

                tracing::warn!(
                    "Attempt {} failed for {}, retrying in {:.1}s: {}",
                    retry,
                    label,
                    delay.as_secs_f64(),
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::debug!(
                        target_op = label,
                        attempts = retry + 1,
                        "Giving up after retries exhausted: {}",
                        e
                    );
                }
                return Err(e);
            }
        }
    }
}
