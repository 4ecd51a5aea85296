//! Retry decisions and backoff.
//!
//! The executor builds a fresh [`RetryContext`] for every failed attempt of a logical
//! call and asks the [`RetryPolicy`] whether to try again and how long to wait.

use crate::classify::ErrorClassification;
use rand::Rng;
use std::time::Duration;

// Retry settings

/// Default maximum number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base backoff delay in milliseconds
pub const DEFAULT_BACKOFF_FACTOR_MS: u64 = 500;

/// Default backoff cap in milliseconds
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Jitter multiplies the delay by a factor drawn uniformly from this range.
pub const JITTER_RANGE: (f64, f64) = (0.5, 1.5);

/// State of one logical call after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Zero-based index of the attempt that just failed
    pub attempt: u32,
    /// Retry budget of the call
    pub max_retries: u32,
    /// Classification of the failure
    pub classification: ErrorClassification,
    /// Whether the request may be repeated without extra side effects
    pub idempotent: bool,
    /// Whether this call already spent its one token-refresh retry
    pub auth_refreshed: bool,
}

/// Retry policy with capped exponential backoff and optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub backoff_factor: Duration,

    /// Cap for the exponential delay
    pub backoff_max: Duration,

    /// Randomize delays by a factor in [`JITTER_RANGE`]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: Duration::from_millis(DEFAULT_BACKOFF_FACTOR_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            jitter: true,
        }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn with_backoff_factor(mut self, delay: Duration) -> Self {
        self.backoff_factor = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_backoff_max(mut self, delay: Duration) -> Self {
        self.backoff_max = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the context for a failed attempt under this policy.
    #[must_use]
    pub const fn context(
        &self,
        attempt: u32,
        classification: ErrorClassification,
        idempotent: bool,
        auth_refreshed: bool,
    ) -> RetryContext {
        RetryContext {
            attempt,
            max_retries: self.max_retries,
            classification,
            idempotent,
            auth_refreshed,
        }
    }

    /// Decide whether the call gets another attempt.
    ///
    /// True iff budget remains, the class is retryable, a 401 has not already been
    /// retried once, and the request is idempotent or failed before any side effect.
    #[must_use]
    pub const fn should_retry(&self, ctx: &RetryContext) -> bool {
        if ctx.attempt >= ctx.max_retries || !ctx.classification.retryable() {
            return false;
        }
        if ctx.auth_refreshed
            && matches!(ctx.classification, ErrorClassification::Authentication { .. })
        {
            return false;
        }
        ctx.idempotent || ctx.classification.precedes_side_effects()
    }

    /// Delay before retrying after `ctx`.
    ///
    /// A server-directed `retry_after` wins; otherwise the capped exponential delay,
    /// jittered when enabled.
    #[must_use]
    pub fn backoff(&self, ctx: &RetryContext) -> Duration {
        if let Some(retry_after) = ctx.classification.retry_after() {
            return retry_after;
        }

        let delay = self.base_delay(ctx.attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_RANGE.0..=JITTER_RANGE.1);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Un-jittered delay: `min(backoff_max, backoff_factor * 2^attempt)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.min(31));
        std::cmp::min(self.backoff_factor.saturating_mul(multiplier), self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
