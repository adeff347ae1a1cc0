//! Retry policy with exponential backoff.
//!
//! A [`RetryPolicy`] decides which failures are worth retrying, how long to
//! wait between attempts, and drives the retry loop itself. Policies are
//! immutable and cheap to clone; share one across as many concurrent
//! operations as needed. Each `execute` call keeps its own [`RetryState`].

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::{CopilotError, ErrorKind, Result};

/// Immutable retry configuration.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Scale computed delays by a uniform factor in `[0.5, 1.5)`.
    pub jitter: bool,
    pub retryable_status_codes: HashSet<u16>,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_kinds: [
                ErrorKind::Connection,
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::Server,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Whether a failure is worth retrying under this policy.
    ///
    /// Authentication and authorization failures (401/403) are never
    /// retryable: repeating the request cannot fix them.
    pub fn should_retry(&self, error: &CopilotError) -> bool {
        if error.kind() == ErrorKind::Client && matches!(error.status(), Some(401 | 403)) {
            return false;
        }
        if self.retryable_kinds.contains(&error.kind()) {
            return true;
        }
        error
            .status()
            .is_some_and(|code| self.retryable_status_codes.contains(&code))
    }

    /// Delay before the retry for `attempt` (1 = first retry).
    ///
    /// A positive server-supplied `retry_after` (seconds) overrides the
    /// computed backoff entirely.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        self.delay_with_rng(attempt, retry_after, &mut rand::thread_rng())
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt) but with a
    /// caller-supplied randomness source, so jitter is deterministic in tests.
    pub fn delay_with_rng<R: Rng>(
        &self,
        attempt: u32,
        retry_after: Option<u64>,
        rng: &mut R,
    ) -> Duration {
        if let Some(seconds) = retry_after {
            if seconds > 0 {
                return Duration::from_secs(seconds);
            }
        }

        let base = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            capped * rng.gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is exhausted. The original error is returned
    /// unchanged in the failure cases.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_observer(operation, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), invoking `on_retry(attempt, error,
    /// delay)` before each backoff sleep. The observer is never called for
    /// the final, exhausting failure.
    pub async fn execute_with_observer<F, Fut, T, C>(
        &self,
        mut operation: F,
        mut on_retry: C,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnMut(u32, &CopilotError, Duration),
    {
        let mut state = RetryState::new(self);

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !state.should_retry(&error) {
                        if state.attempt() > 0 {
                            warn!(
                                attempts = state.attempt() + 1,
                                error = %error,
                                "giving up after retries"
                            );
                        }
                        return Err(error);
                    }

                    state.record_failure(error);
                    let delay = state.next_delay();
                    if let Some(error) = state.last_error() {
                        debug!(
                            attempt = state.attempt(),
                            max_retries = self.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying after failure"
                        );
                        on_retry(state.attempt(), error, delay);
                    }

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Mutable bookkeeping for one logical operation. Never shared.
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    last_error: Option<CopilotError>,
}

impl<'a> RetryState<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last_error: None,
        }
    }

    /// Retries taken so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&CopilotError> {
        self.last_error.as_ref()
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_retries
    }

    pub fn record_failure(&mut self, error: CopilotError) {
        self.attempt += 1;
        self.last_error = Some(error);
    }

    pub fn should_retry(&self, error: &CopilotError) -> bool {
        !self.exhausted() && self.policy.should_retry(error)
    }

    /// Delay before the next retry, honoring a rate-limit `retry_after`.
    pub fn next_delay(&self) -> Duration {
        let retry_after = self.last_error.as_ref().and_then(CopilotError::retry_after);
        self.policy.delay_for_attempt(self.attempt, retry_after)
    }
}

/// Wrap an operation with retries under `policy`.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    policy.execute(operation).await
}

/// Wrap an operation with retries and a retry observer.
pub async fn with_retry_observed<F, Fut, T, C>(
    policy: &RetryPolicy,
    operation: F,
    on_retry: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: FnMut(u32, &CopilotError, Duration),
{
    policy.execute_with_observer(operation, on_retry).await
}
