//! The closed set of status transitions a message can go through
//!
//! Every mutation of a stored message is one of these. A store applies a
//! transition only if the message is currently in [`Transition::from`];
//! otherwise it reports [`TransitionOutcome::NotApplicable`] and changes
//! nothing. That compare-and-swap on `status` is what lets several workers
//! share one store without delivering a message twice.

use chrono::{DateTime, Utc};

use crate::{Message, MessageStatus, Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `pending -> processing`: a worker takes ownership of the message
    Claim { at: DateTime<Utc> },
    /// `processing -> sent`
    Deliver { at: DateTime<Utc> },
    /// `processing -> pending`: a retryable failure
    Reschedule {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: String,
    },
    /// `processing -> failed`: the retry budget is exhausted
    Fail { at: DateTime<Utc>, error: String },
    /// `failed -> pending`: operator requested another round of attempts
    Requeue { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The message was missing or not in the expected source status
    NotApplicable,
}

impl TransitionOutcome {
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl Transition {
    /// Status the message must currently have
    #[must_use]
    pub const fn from(&self) -> MessageStatus {
        match self {
            Self::Claim { .. } => MessageStatus::Pending,
            Self::Deliver { .. } | Self::Reschedule { .. } | Self::Fail { .. } => {
                MessageStatus::Processing
            }
            Self::Requeue { .. } => MessageStatus::Failed,
        }
    }

    /// Status the message has afterwards
    #[must_use]
    pub const fn to(&self) -> MessageStatus {
        match self {
            Self::Claim { .. } => MessageStatus::Processing,
            Self::Deliver { .. } => MessageStatus::Sent,
            Self::Reschedule { .. } | Self::Requeue { .. } => MessageStatus::Pending,
            Self::Fail { .. } => MessageStatus::Failed,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Deliver { .. } => "deliver",
            Self::Reschedule { .. } => "reschedule",
            Self::Fail { .. } => "fail",
            Self::Requeue { .. } => "requeue",
        }
    }

    /// Whether this transition records the result of a claim, i.e. leaves
    /// `processing`
    #[must_use]
    pub const fn settles_claim(&self) -> bool {
        matches!(
            self,
            Self::Deliver { .. } | Self::Reschedule { .. } | Self::Fail { .. }
        )
    }

    /// Reject transitions that cannot settle a claim
    ///
    /// # Errors
    /// [`StoreError::Internal`] for `claim` and `requeue`
    pub fn ensure_settles_claim(&self) -> Result<()> {
        if self.settles_claim() {
            Ok(())
        } else {
            Err(StoreError::Internal(format!(
                "{} transition does not settle a claim",
                self.name()
            )))
        }
    }

    /// Apply this transition only if `message` is still held by the claim
    /// made at `claimed_at`
    pub fn apply_claimed(
        &self,
        message: &mut Message,
        claimed_at: DateTime<Utc>,
    ) -> TransitionOutcome {
        if message.claimed_at != Some(claimed_at) {
            return TransitionOutcome::NotApplicable;
        }

        self.apply(message)
    }

    /// Apply this transition to an in-memory record
    ///
    /// Backends that keep records in memory call this; the `SQLite` backend
    /// expresses the same field updates in SQL.
    pub fn apply(&self, message: &mut Message) -> TransitionOutcome {
        if message.status != self.from() {
            return TransitionOutcome::NotApplicable;
        }

        match self {
            Self::Claim { at } => {
                message.claimed_at = Some(*at);
            }
            Self::Deliver { at } => {
                message.processed_at = Some(*at);
                message.claimed_at = None;
            }
            Self::Reschedule {
                retry_count,
                scheduled_at,
                error,
            } => {
                message.retry_count = *retry_count;
                message.scheduled_at = *scheduled_at;
                message.error_message = Some(error.clone());
                message.claimed_at = None;
            }
            Self::Fail { at, error } => {
                message.processed_at = Some(*at);
                message.error_message = Some(error.clone());
                message.claimed_at = None;
            }
            Self::Requeue { at } => {
                message.retry_count = 0;
                message.scheduled_at = *at;
                message.processed_at = None;
                message.claimed_at = None;
            }
        }

        message.status = self.to();
        TransitionOutcome::Applied
    }
}
