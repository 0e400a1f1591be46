use std::time::Duration;

use bon::Builder;
use tokio::time::Instant;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5_000);

/// Bounded exponential backoff for outbound requests.
///
/// The delay before retry `n` (zero based) is `min(initial_delay * 2^n, max_delay)`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
    #[builder(default = DEFAULT_INITIAL_DELAY)]
    pub initial_delay: Duration,
    #[builder(default = DEFAULT_MAX_DELAY)]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Where a single call is in its retry lifecycle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Created, nothing sent yet
    Idle,
    /// An attempt is in flight or a retry is scheduled
    Attempting {
        /// Retries performed so far
        attempt: u32,
    },
    /// The call produced a final non-error outcome
    Succeeded,
    /// The call failed and no further attempt will be made
    Exhausted,
}

/// Per-call retry bookkeeping. Never shared across calls.
#[derive(Debug, Clone)]
pub struct RetryContext {
    policy: RetryPolicy,
    attempt: u32,
    started_at: Instant,
    state: RetryState,
}

impl RetryContext {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            started_at: Instant::now(),
            state: RetryState::Idle,
        }
    }

    /// Mark the next attempt as in flight.
    pub fn begin(&mut self) {
        self.state = RetryState::Attempting {
            attempt: self.attempt,
        };
    }

    /// Consume one retry from the budget and return how long to wait before it, or `None`
    /// (moving to [`RetryState::Exhausted`]) when the budget is spent.
    pub fn schedule_retry(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            self.state = RetryState::Exhausted;
            return None;
        }

        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        self.state = RetryState::Attempting {
            attempt: self.attempt,
        };
        Some(delay)
    }

    pub fn succeed(&mut self) {
        self.state = RetryState::Succeeded;
    }

    /// Terminal failure that is not eligible for retry.
    pub fn fail(&mut self) {
        self.state = RetryState::Exhausted;
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn state(&self) -> RetryState {
        self.state
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
