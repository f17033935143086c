//! Bounded retry with exponential backoff for whole sync attempts.
//!
//! - Default: 3 attempts total, waiting 5s then 10s between them
//! - Every failure is retried the same way; no error classification
//! - Each attempt is bounded by a timeout, and a timeout counts as a failure
//!
//! Blind retry is sound here because every step of a sync is idempotent:
//! re-running a partially applied attempt converges on the same task state.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Multiplier applied per retry.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 1 initial attempt + 2 retries, waiting 5s then 10s.
    pub const DEFAULT: Self = Self {
        max_retries: 2,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (0-indexed):
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Failed(E),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

/// Every attempt failed; carries the last failure.
#[derive(Debug)]
pub struct RetriesExhausted<E: std::error::Error + 'static> {
    pub attempts: u32,
    pub last_error: AttemptError<E>,
}

impl<E: std::error::Error + 'static> fmt::Display for RetriesExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetriesExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Runs `operation` until it succeeds or the attempt budget is spent.
///
/// Each call is wrapped in `attempt_timeout`. Between failures the task sleeps
/// for `config.delay_for_attempt(n)`. A timed-out attempt is dropped locally
/// but may still complete remotely; callers must only pass idempotent work.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: RetryConfig,
    attempt_timeout: Duration,
    mut operation: F,
) -> Result<T, RetriesExhausted<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match tokio::time::timeout(attempt_timeout, operation(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut(attempt_timeout),
        };

        if attempt >= max_attempts {
            return Err(RetriesExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = config.delay_for_attempt(attempt - 1);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Sync attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
