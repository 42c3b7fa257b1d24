//! Per-chunk retry scheduling.
//!
//! Each chunk call walks a small state machine:
//!
//! ```text
//!            ┌──────── failure, budget left ────────┐
//!            ▼                                      │
//! Pending ──call──▶ Retrying(n) ──sleep──▶ call ────┤
//!    │                                              │
//!    ├──── success ──▶ Succeeded                    │
//!    ├──── budget spent / not retryable ──▶ Failed ◀┘
//!    └──── cancel flag seen ──▶ Cancelled
//! ```
//!
//! Cancellation and timeouts are transitions, not special cases: the driver
//! checks the [`CancelToken`] before every dispatch and every sleep, and a
//! call exceeding its ceiling fails like any other.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::AnalyzerError;
use crate::{Error, Result};

/// Default number of attempts per chunk.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff without jitter.
///
/// Delays double from `base` and are capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Start at `base`, never exceeding `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// The next delay; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Back to `base`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// How hard to try a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// First backoff delay.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Wall-clock ceiling for one analyzer call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Reject a policy that could never make a call.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfig("call_timeout must be non-zero".into()));
        }
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay)
    }
}

/// Where a chunk call stands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    /// No call made yet.
    Pending,
    /// Attempt `attempt` failed; the next one follows after `delay`.
    Retrying {
        /// Attempts made so far.
        attempt: u32,
        /// Sleep before the next attempt.
        delay: Duration,
    },
    /// A call returned a response.
    Succeeded {
        /// Attempts it took.
        attempts: u32,
    },
    /// The retry budget is spent, or the failure cannot be retried.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        error: AnalyzerError,
    },
    /// The cancel flag was raised.
    Cancelled,
}

impl AttemptState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// What follows a failed call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep `delay`, then call again.
    Retry {
        /// Attempts made so far.
        attempt: u32,
        /// Sleep before the next attempt.
        delay: Duration,
    },
    /// Stop with the last failure.
    GiveUp {
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        error: AnalyzerError,
    },
}

/// The attempt state machine for one chunk.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    max_attempts: u32,
    backoff: Backoff,
    attempts: u32,
    state: AttemptState,
}

impl RetryMachine {
    /// A fresh machine in [`AttemptState::Pending`].
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            backoff: policy.backoff(),
            attempts: 0,
            state: AttemptState::Pending,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record the start of a call.
    pub fn begin(&mut self) {
        self.attempts += 1;
    }

    /// Record a successful call.
    pub fn succeed(&mut self) -> &AttemptState {
        self.state = AttemptState::Succeeded {
            attempts: self.attempts,
        };
        &self.state
    }

    /// Record a failed call and decide what follows.
    pub fn fail(&mut self, error: AnalyzerError) -> RetryDecision {
        if self.attempts < self.max_attempts && error.is_retryable() {
            let delay = self.backoff.next_delay();
            self.state = AttemptState::Retrying {
                attempt: self.attempts,
                delay,
            };
            RetryDecision::Retry {
                attempt: self.attempts,
                delay,
            }
        } else {
            self.state = AttemptState::Failed {
                attempts: self.attempts,
                error: error.clone(),
            };
            RetryDecision::GiveUp {
                attempts: self.attempts,
                error,
            }
        }
    }

    /// Record that the cancel flag was seen.
    pub fn cancel(&mut self) -> &AttemptState {
        self.state = AttemptState::Cancelled;
        &self.state
    }
}

/// Drive `call` through a [`RetryMachine`] until it reaches a terminal state.
///
/// Each attempt is bounded by `policy.call_timeout`. A raised `cancel` flag
/// stops the loop before the next dispatch and interrupts a backoff sleep,
/// but never an attempt already in flight.
///
/// Returns [`Error::ChunkCallFailed`] when the budget is spent and
/// [`Error::Cancelled`] when the flag was seen.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    chunk_index: usize,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AnalyzerError>>,
{
    let mut machine = RetryMachine::new(policy);

    loop {
        if cancel.is_cancelled() {
            machine.cancel();
            return Err(Error::Cancelled);
        }

        machine.begin();
        let outcome = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnalyzerError::Timeout(policy.call_timeout)),
        };

        let error = match outcome {
            Ok(value) => {
                machine.succeed();
                return Ok(value);
            }
            Err(error) => error,
        };

        match machine.fail(error) {
            RetryDecision::Retry { attempt, delay } => {
                debug!(chunk = chunk_index, attempt, ?delay, "analyzer call failed; retrying");
                if cancel.is_cancelled() {
                    machine.cancel();
                    return Err(Error::Cancelled);
                }
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        machine.cancel();
                        return Err(Error::Cancelled);
                    }
                }
            }
            RetryDecision::GiveUp { attempts, error } => {
                return Err(Error::ChunkCallFailed {
                    chunk_index,
                    attempts,
                    source: error,
                });
            }
        }
    }
}
