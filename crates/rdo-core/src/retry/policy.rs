use rand::Rng;
use std::time::Duration;

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect, read or stall).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// HTTP status that is retryable but not strictly throttling (5xx).
    Http5xx(u16),
    /// Body ended before the announced length.
    ShortBody,
    /// Not retried: 4xx, storage failure, size change.
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Mark the task failed.
    GiveUp,
    /// Re-queue the task; it becomes eligible after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with caps and jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Transient failures a task may accumulate; reaching it gives up.
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after a failure.
    ///
    /// `failures` is the task's retry count including this failure (1-based).
    pub fn decide(&self, failures: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_transient() || failures >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(jitter(self.backoff(failures)))
    }

    /// Un-jittered delay: base * 2^(failures-1), capped at `max_delay`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = 1u32 << failures.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

/// Uniform in [delay/2, delay] so retries of many tasks spread out.
fn jitter(delay: Duration) -> Duration {
    let max = delay.as_millis().min(u64::MAX as u128) as u64;
    if max < 2 {
        return delay;
    }
    Duration::from_millis(rand::rng().random_range(max / 2..=max))
}
