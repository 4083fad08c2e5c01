//! Retry policy for delivery attempts.
//!
//! Given a message and the outcome of one attempt, decides the message's next
//! state. Pure: the worker and stall recovery persist whatever it returns.

use chrono::{DateTime, TimeDelta, Utc};
use courier_store::{
    Message, MessageStatus, Transition,
    message::{DEFAULT_MAX_RETRIES, truncate_millis},
};
use serde::{Deserialize, Serialize};

use crate::policy::Backoff;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Failed(String),
}

/// Next state of a message after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `sent`
    Sent { processed_at: DateTime<Utc> },

    /// Back to `pending`, to be attempted again at `scheduled_at`
    Retry {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: String,
    },

    /// `failed`; terminal until an operator retries it
    Failed {
        processed_at: DateTime<Utc>,
        error: String,
    },
}

impl Decision {
    #[must_use]
    pub const fn next_status(&self) -> MessageStatus {
        match self {
            Self::Sent { .. } => MessageStatus::Sent,
            Self::Retry { .. } => MessageStatus::Pending,
            Self::Failed { .. } => MessageStatus::Failed,
        }
    }

    /// The conditional `processing -> *` transition that persists this
    /// decision
    #[must_use]
    pub fn into_transition(self) -> Transition {
        match self {
            Self::Sent { processed_at } => Transition::Deliver { at: processed_at },
            Self::Retry {
                retry_count,
                scheduled_at,
                error,
            } => Transition::Reschedule {
                retry_count,
                scheduled_at,
                error,
            },
            Self::Failed {
                processed_at,
                error,
            } => Transition::Fail {
                at: processed_at,
                error,
            },
        }
    }
}

/// Retry policy configuration for delivery operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry budget for messages enqueued without one.
    ///
    /// A message is attempted at most `max_retries + 1` times.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub default_max_retries: u32,

    /// Delay schedule between attempts.
    ///
    /// Default: `Fixed(delay_secs: 300)`
    #[serde(default)]
    pub backoff: Backoff,
}

mod defaults {
    pub const fn max_retries() -> u32 {
        super::DEFAULT_MAX_RETRIES
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_retries: defaults::max_retries(),
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a failure of `message` now would still be retried.
    #[must_use]
    pub const fn should_retry(message: &Message) -> bool {
        message.retry_count < message.max_retries
    }

    /// When a message that failed at `now` after `retry_count` retries is
    /// next eligible
    #[must_use]
    pub fn next_attempt_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let scheduled = TimeDelta::from_std(self.backoff.delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        truncate_millis(scheduled)
    }

    /// Decide what happens to `message` after an attempt ending at `now`
    #[must_use]
    pub fn decide(
        &self,
        message: &Message,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Decision {
        let now = truncate_millis(now);

        match outcome {
            AttemptOutcome::Delivered => Decision::Sent { processed_at: now },
            AttemptOutcome::Failed(error) if Self::should_retry(message) => Decision::Retry {
                retry_count: message.retry_count + 1,
                scheduled_at: self.next_attempt_at(message.retry_count, now),
                error,
            },
            AttemptOutcome::Failed(error) => Decision::Failed {
                processed_at: now,
                error,
            },
        }
    }
}
