//! Retry and poll helpers shared by the pipeline stages.
//!
//! Each stage owns its own [`RetryPolicy`] (conversion retries linearly,
//! recognition backs off exponentially, delivery uses a fixed delay). The
//! custom recognition backend additionally waits on a [`PollPolicy`], which
//! re-checks one in-flight submission rather than resubmitting it.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{BackoffConfig, ConversionConfig, NotificationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The error was classified as non-transient; no further attempts were made.
    Permanent { error: E, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { error: E, attempts: u32 },
}

impl<E> RetryFailure<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            Self::Permanent { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::MAX,
            backoff,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn conversion(config: &ConversionConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
            Backoff::Linear,
        )
    }

    pub fn recognition(config: &BackoffConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Backoff::Exponential,
        )
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }

    pub fn notification(config: &NotificationConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
            Backoff::Fixed,
        )
    }

    /// Delay to wait after the `failures`-th failed attempt (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(failures),
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent. On success returns the value and the attempt count.
    pub fn run<T, E, F, C>(
        &self,
        label: &str,
        mut op: F,
        is_transient: C,
    ) -> Result<(T, u32), RetryFailure<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt) {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if !is_transient(&error) => {
                    debug!(label, attempt, error = %error, "permanent failure, not retrying");
                    return Err(RetryFailure::Permanent {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(label, attempt, error = %error, "retry limit exhausted");
                    return Err(RetryFailure::Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

/// Result of a single status check on an in-flight submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
}

#[derive(Debug)]
pub enum PollFailure<E> {
    /// A check returned a terminal error.
    Failed { error: E, polls: u32 },
    /// Still pending (or transiently failing) after every allowed check.
    TimedOut { polls: u32, last_error: Option<E> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_polls: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_polls: u32, interval: Duration) -> Self {
        Self {
            max_polls: max_polls.max(1),
            interval,
        }
    }

    /// Checks up to `max_polls` times, sleeping `interval` between checks.
    /// A transient check error uses up one poll like a pending status.
    pub fn run<T, E, F, C>(
        &self,
        label: &str,
        mut check: F,
        is_transient: C,
    ) -> Result<(T, u32), PollFailure<E>>
    where
        F: FnMut(u32) -> Result<PollStatus<T>, E>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut last_error = None;
        for poll in 1..=self.max_polls {
            match check(poll) {
                Ok(PollStatus::Ready(value)) => return Ok((value, poll)),
                Ok(PollStatus::Pending) => {
                    debug!(label, poll, max_polls = self.max_polls, "still pending");
                }
                Err(error) if is_transient(&error) => {
                    warn!(label, poll, error = %error, "transient poll failure");
                    last_error = Some(error);
                }
                Err(error) => return Err(PollFailure::Failed { error, polls: poll }),
            }

            if poll < self.max_polls {
                std::thread::sleep(self.interval);
            }
        }

        Err(PollFailure::TimedOut {
            polls: self.max_polls,
            last_error,
        })
    }
}
