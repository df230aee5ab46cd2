//! Retry with exponential backoff and jitter.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Backoff configuration for backend calls.
///
/// `max_attempts` counts the initial attempt, so `1` means "never retry".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor in `0.0..=1.0`; the delay varies by ±(factor * delay).
    pub jitter_factor: f32,
}

impl Default for RetryPolicy {
    /// Policy for metadata calls a user action is blocked on: a few quick
    /// attempts, bounded well under the request timeout.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A single attempt. Used for replay chunks, whose index must not be
    /// re-sent out of order.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Delay to wait before `attempt` (0-indexed). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(16);
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0 {
            return Duration::from_millis(base);
        }

        let spread = (base as f64 * jitter as f64) as u64;
        let offset = next_random() % (spread * 2 + 1);
        Duration::from_millis(base - spread + offset)
    }
}

/// Outcome of [`with_retry`].
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// The operation succeeded (possibly after retries).
    Success(T),
    /// The operation failed with an error that is not worth retrying.
    Failure(E),
    /// Every attempt failed with a retryable error.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Collapse into a plain `Result`, keeping the last error.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failure(e) => Err(e),
            RetryResult::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait RetryableError {
    /// True for transient failures (timeouts, resets, 429, 502-504).
    fn is_retryable(&self) -> bool;

    /// Server-requested delay (`Retry-After`), if any.
    fn retry_after(&self) -> Option<Duration>;
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// Blocks the calling thread between attempts; call it from a blocking
/// context (e.g. inside `tokio::task::spawn_blocking`).
pub fn with_retry<T, E, F>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: RetryableError,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation() {
            Ok(value) => return RetryResult::Success(value),
            Err(err) => err,
        };

        attempt += 1;
        if !err.is_retryable() {
            return RetryResult::Failure(err);
        }
        if attempt >= attempts {
            return RetryResult::Exhausted {
                last_error: err,
                attempts,
            };
        }

        let delay = err
            .retry_after()
            .map(|server| server.min(Duration::from_millis(policy.max_delay_ms)))
            .unwrap_or_else(|| policy.delay_for_attempt(attempt));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Cheap non-cryptographic randomness for jitter (splitmix64 over a shared counter).
fn next_random() -> u64 {
    static STATE: AtomicU64 = AtomicU64::new(0);

    let mut seed = STATE.load(Ordering::Relaxed);
    if seed == 0 {
        seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9);
        let _ = STATE.compare_exchange(0, seed, Ordering::Relaxed, Ordering::Relaxed);
    }

    let mut z = STATE
        .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
