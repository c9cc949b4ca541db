//! Retry scheduling for individual recipients.
//!
//! Backoff is linear in the number of attempts, one minute per attempt, and
//! capped at thirty minutes. A recipient that reaches `max_attempts` is
//! abandoned: it becomes done and keeps its last error.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RecipientState, RecipientStatus};

/// Backoff never grows past this many minutes.
pub const MAX_BACKOFF_MINUTES: u32 = 30;

/// Retry policy configuration for delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after which a recipient is abandoned.
    ///
    /// Default: 100 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Pending and due
    #[must_use]
    pub fn eligible_now(status: &RecipientStatus, now: DateTime<Utc>) -> bool {
        status.state == RecipientState::Pending && status.next_attempt_at <= now
    }

    /// Wait after the `attempts`-th failure (`attempts` counted after the
    /// increment).
    #[must_use]
    pub fn backoff_delay(attempts: u32) -> TimeDelta {
        TimeDelta::minutes(i64::from(attempts.min(MAX_BACKOFF_MINUTES)))
    }

    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Apply a failed attempt: count it, record the error and either
    /// reschedule or abandon the recipient.
    pub fn apply_failure(&self, status: &mut RecipientStatus, error: String, now: DateTime<Utc>) {
        status.attempts = status.attempts.saturating_add(1);
        status.last_error = Some(error);
        status.next_attempt_at = now + Self::backoff_delay(status.attempts);
        status.state = if self.is_exhausted(status.attempts) {
            RecipientState::Done
        } else {
            RecipientState::Pending
        };
    }

    /// Apply a successful attempt
    pub fn apply_success(status: &mut RecipientStatus) {
        status.state = RecipientState::Done;
        status.last_error = None;
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        100
    }
}
