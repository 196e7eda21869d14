//! Retry policy and delay schedule.

use std::time::Duration;

use rand::Rng;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default growth factor between consecutive delays.
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

/// Immutable retry configuration.
///
/// Built once with the `with_*` setters and then shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the exponential base.
    #[must_use]
    pub const fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Returns the maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the maximum delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the exponential base.
    #[must_use]
    pub const fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    /// Returns whether jitter is enabled.
    #[must_use]
    pub const fn jitter(&self) -> bool {
        self.jitter
    }
}

/// Computes the delay before retry number `attempt` (zero-based).
///
/// `min(base · exponential_base^attempt, max)`, scaled by a uniform factor
/// in `[0.5, 1.5)` when jitter is enabled.
#[must_use]
pub fn delay_for(attempt: u32, policy: &RetryPolicy) -> Duration {
    let max = policy.max_delay.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = policy.base_delay.as_secs_f64() * policy.exponential_base.powi(exponent);
    let capped = if raw.is_nan() { max } else { raw.min(max) };

    let secs = if policy.jitter {
        capped * rand::thread_rng().gen_range(0.5..1.5)
    } else {
        capped
    };

    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(policy.max_delay)
}
