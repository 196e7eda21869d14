//! Retry combinator and stepped retry state machine.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use super::classify::{Retryability, StatusCoded, classify};
use super::policy::{RetryPolicy, delay_for};

/// Lifecycle of a [`RetryOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempts may still be made.
    Pending,
    /// The operation completed successfully.
    Succeeded,
    /// A fatal error occurred or the retry budget ran out.
    Exhausted,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make another attempt. `attempt` is the zero-based
    /// index of the retry about to happen.
    Retry {
        /// Zero-based retry index.
        attempt: u32,
        /// Delay to wait before retrying.
        delay: Duration,
    },
    /// The error is not retryable.
    Fatal,
    /// The error is retryable but the budget is spent.
    Exhausted,
}

/// Explicit, step-by-step retry driver.
///
/// ```ignore
/// let mut op = RetryOperation::new(&policy);
/// while op.should_retry() {
///     match fetch().await {
///         Ok(message) => {
///             op.mark_success();
///             break;
///         }
///         Err(e) => op.handle_error(e).await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct RetryOperation<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    state: RetryState,
}

impl<'a> RetryOperation<'a> {
    /// Creates a pending operation governed by `policy`.
    #[must_use]
    pub const fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            state: RetryState::Pending,
        }
    }

    /// Returns the number of retries scheduled so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> RetryState {
        self.state
    }

    /// Returns true while another attempt should be made.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.state == RetryState::Pending && self.attempt <= self.policy.max_retries()
    }

    /// Marks the operation as succeeded.
    pub fn mark_success(&mut self) {
        self.state = RetryState::Succeeded;
    }

    /// Decides how to proceed after `error` without sleeping.
    ///
    /// Advances the attempt counter when a retry is scheduled and moves the
    /// operation to [`RetryState::Exhausted`] otherwise.
    pub fn decide<E: StatusCoded + ?Sized>(&mut self, error: &E) -> RetryDecision {
        if classify(error) == Retryability::Fatal {
            self.state = RetryState::Exhausted;
            return RetryDecision::Fatal;
        }

        if self.attempt >= self.policy.max_retries() {
            self.state = RetryState::Exhausted;
            return RetryDecision::Exhausted;
        }

        let attempt = self.attempt;
        let delay = delay_for(attempt, self.policy);
        self.attempt += 1;
        RetryDecision::Retry { attempt, delay }
    }

    /// Handles a failed attempt: sleeps before the next one, or hands the
    /// error back when it is fatal or the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `error` itself when no further attempt will be made.
    pub async fn handle_error<E: StatusCoded + Display>(&mut self, error: E) -> Result<(), E> {
        let decision = self.decide(&error);
        log_decision(decision, &error, self.policy.max_retries());
        match decision {
            RetryDecision::Retry { delay, .. } => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            RetryDecision::Fatal | RetryDecision::Exhausted => Err(error),
        }
    }

    /// Runs `operation` until it succeeds, fails fatally, or exhausts the
    /// retry budget.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, or the last transient error after exhaustion.
    pub async fn execute<T, E, F, Fut>(mut self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StatusCoded + Display,
    {
        loop {
            match operation().await {
                Ok(value) => {
                    self.mark_success();
                    return Ok(value);
                }
                Err(e) => self.handle_error(e).await?,
            }
        }
    }
}

/// Runs `operation` with retries according to `policy`.
///
/// # Errors
///
/// Returns the first fatal error, or the last transient error once the
/// policy's retries are exhausted.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StatusCoded + Display,
{
    run_with_retry_notify(policy, operation, |_, _, _| {}).await
}

/// Like [`run_with_retry`], calling `on_retry(attempt, error, delay)` before
/// each backoff sleep.
///
/// # Errors
///
/// Returns the first fatal error, or the last transient error once the
/// policy's retries are exhausted.
pub async fn run_with_retry_notify<T, E, F, Fut, N>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StatusCoded + Display,
    N: FnMut(u32, &E, Duration),
{
    let mut op = RetryOperation::new(policy);
    loop {
        let error = match operation().await {
            Ok(value) => {
                op.mark_success();
                return Ok(value);
            }
            Err(e) => e,
        };

        let decision = op.decide(&error);
        log_decision(decision, &error, policy.max_retries());
        match decision {
            RetryDecision::Retry { attempt, delay } => {
                on_retry(attempt, &error, delay);
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Fatal | RetryDecision::Exhausted => return Err(error),
        }
    }
}

fn log_decision<E: StatusCoded + Display>(decision: RetryDecision, error: &E, max_retries: u32) {
    match decision {
        RetryDecision::Retry { attempt, delay } => warn!(
            retry = attempt + 1,
            max_retries,
            status = error.status_code(),
            ?delay,
            "Retrying after transient error: {error}"
        ),
        RetryDecision::Exhausted => {
            error!(max_retries, "Retries exhausted: {error}");
        }
        RetryDecision::Fatal => {}
    }
}
