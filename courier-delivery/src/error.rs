//! Typed error handling for delivery operations.
//!
//! - [`ChannelError`]: a send attempt failed at the channel
//! - [`DeliveryError`]: how the retry policy classified a failed attempt
//! - [`ServiceError`]: `enqueue` rejected or could not persist a message
//! - [`MaintenanceError`]: `retry`, `cleanup` or stall recovery failed
//! - [`ConfigError`]: a delivery configuration that cannot work

use std::time::Duration;

use courier_store::{MessageId, StoreError, ValidationError};
use thiserror::Error;

/// Failure reported by a channel client for one send attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not connected.
    #[error("Channel not ready")]
    NotReady,

    /// The channel refused the message (bad recipient, content policy).
    #[error("Rejected by channel: {0}")]
    Rejected(String),

    /// The connection failed while sending.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The send did not complete in time.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Classification of a failed delivery attempt.
///
/// These are logged by the worker and never returned to producers.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message was rescheduled and will be attempted again.
    #[error("Transient failure for {id} (retry {retry_count} of {max_retries}): {reason}")]
    Transient {
        id: MessageId,
        retry_count: u32,
        max_retries: u32,
        reason: String,
    },

    /// The retry budget is exhausted; the message is now `failed`.
    #[error("Permanent failure for {id} after {attempts} attempts: {reason}")]
    Permanent {
        id: MessageId,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryError {
    /// Returns `true` if the message will be attempted again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` if the message reached `failed`.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Errors returned to producers by `enqueue`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from administrative operations.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A duration could not be represented as a point in time.
    #[error("Invalid window: {0:?}")]
    InvalidWindow(Duration),
}

/// Rejected delivery configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Stall recovery would reclaim sends that are still within their timeout.
    #[error("stall_timeout_secs ({stall}) must be greater than send_timeout_secs ({send})")]
    StallTimeoutTooShort { stall: u64, send: u64 },

    #[error("batch_size must be at least 1")]
    EmptyBatch,
}
