//! Message records and their lifecycle status

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, ValidationError};

/// Default retry budget for a message when the producer does not supply one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Truncate a timestamp to millisecond precision, which is what every backend
/// persists.
#[must_use]
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// The current time at storage precision
#[must_use]
pub fn now() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Lifecycle status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl MessageStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Processing, Self::Sent, Self::Failed];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// `sent` and `failed` never change again through delivery
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub recipient: String,
    pub body: String,
    pub status: MessageStatus,
    /// Higher sorts first
    pub priority: i32,
    /// Not eligible for delivery before this instant
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set when the message reaches `sent` or `failed`
    pub processed_at: Option<DateTime<Utc>>,
    /// Set while the message is `processing`
    pub claimed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last failure reason
    pub error_message: Option<String>,
}

impl Message {
    /// Materialise a freshly enqueued message
    ///
    /// `created_at` is taken from the id so that id order and creation order
    /// never disagree.
    #[must_use]
    pub fn from_new(id: MessageId, new: NewMessage) -> Self {
        let created_at = i64::try_from(id.timestamp_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(now);

        Self {
            id,
            recipient: new.recipient,
            body: new.body,
            status: MessageStatus::Pending,
            priority: new.priority,
            scheduled_at: new.scheduled_at.map_or(created_at, truncate_millis),
            created_at,
            processed_at: None,
            claimed_at: None,
            retry_count: 0,
            max_retries: new.max_retries,
            error_message: None,
        }
    }

    /// Retries left before the next failure becomes permanent
    #[must_use]
    pub const fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }
}

/// Producer-supplied options for `enqueue`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    #[serde(default)]
    pub priority: i32,
    /// Defaults to the enqueue time
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Defaults to the configured retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A validated message that has not been stored yet
///
/// The only way to build one is [`NewMessage::new`], so a store never sees an
/// empty recipient or body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    recipient: String,
    body: String,
    priority: i32,
    scheduled_at: Option<DateTime<Utc>>,
    max_retries: u32,
}

impl NewMessage {
    /// Validate producer input
    ///
    /// # Errors
    /// If the recipient or body is empty or only whitespace
    pub fn new(
        recipient: impl Into<String>,
        body: impl Into<String>,
        options: EnqueueOptions,
        default_max_retries: u32,
    ) -> Result<Self, ValidationError> {
        let recipient = recipient.into();
        let body = body.into();

        if recipient.trim().is_empty() {
            return Err(ValidationError::EmptyRecipient);
        }

        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }

        Ok(Self {
            recipient,
            body,
            priority: options.priority,
            scheduled_at: options.scheduled_at,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
        })
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// The persisted channel status singleton
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatusRecord {
    pub is_ready: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Messages that reached `sent`
    pub message_count: u64,
    /// Messages that reached `failed`
    pub error_count: u64,
}
