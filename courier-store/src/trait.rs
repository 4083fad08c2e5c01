use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ChannelStatusRecord, DedupKey, Message, MessageId, MessageStatus, NewMessage, Result,
    Transition, TransitionOutcome,
};

/// Durable record of every outbound message
#[async_trait]
pub trait MessageStore: Send + Sync + Debug {
    /// Persist a new `pending` message and return its id
    ///
    /// # Errors
    /// If the message cannot be persisted
    async fn enqueue(&self, message: NewMessage) -> Result<MessageId>;

    /// # Errors
    /// [`crate::StoreError::NotFound`] if no message has this id
    async fn get(&self, id: &MessageId) -> Result<Message>;

    /// Every `pending` message, in delivery order, regardless of schedule
    ///
    /// # Errors
    /// If the store cannot be read
    async fn list_pending(&self) -> Result<Vec<Message>>;

    /// At most `limit` eligible messages at `now`, in delivery order
    ///
    /// # Errors
    /// If the store cannot be read
    async fn list_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Message>>;

    /// Every message with `status`, oldest first
    ///
    /// # Errors
    /// If the store cannot be read
    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<Message>>;

    /// # Errors
    /// If the store cannot be read
    async fn count_by_status(&self, status: MessageStatus) -> Result<usize>;

    /// `processing` messages claimed before `claimed_before`
    ///
    /// # Errors
    /// If the store cannot be read
    async fn list_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Message>>;

    /// Conditionally apply `transition`; see [`Transition`]
    ///
    /// # Errors
    /// If the store cannot be written. A message in the wrong status is not
    /// an error.
    async fn transition(&self, id: &MessageId, transition: &Transition)
    -> Result<TransitionOutcome>;

    /// Record the result of the claim made at `claimed_at`
    ///
    /// `transition` applies only while the message is still `processing`
    /// under that same claim; a result for a claim that was recovered and
    /// handed to another worker is discarded. A message reaching `sent` or
    /// `failed` is counted in the channel status as part of the same write.
    ///
    /// # Errors
    /// If `transition` does not leave `processing`, or the store cannot be
    /// written
    async fn settle(
        &self,
        id: &MessageId,
        claimed_at: DateTime<Utc>,
        transition: &Transition,
    ) -> Result<TransitionOutcome>;

    /// Delete `sent`/`failed` messages processed before `cutoff`
    ///
    /// Returns the number of messages deleted.
    ///
    /// # Errors
    /// If the store cannot be written
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Persistence of the channel status singleton
#[async_trait]
pub trait StatusStore: Send + Sync + Debug {
    /// # Errors
    /// If the store cannot be read
    async fn load_status(&self) -> Result<ChannelStatusRecord>;

    /// Record a readiness transition; also refreshes the heartbeat
    ///
    /// # Errors
    /// If the store cannot be written
    async fn set_ready(&self, ready: bool, at: DateTime<Utc>) -> Result<()>;

    /// # Errors
    /// If the store cannot be written
    async fn heartbeat(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Log of notifications already sent, for producers that must notify a
/// subject at most once per condition
#[async_trait]
pub trait DedupLog: Send + Sync + Debug {
    /// # Errors
    /// If the store cannot be read
    async fn was_already_sent(&self, key: &DedupKey) -> Result<bool>;

    /// Record `key` unless an entry exists. Returns `true` if this call
    /// created the entry.
    ///
    /// # Errors
    /// If the store cannot be written
    async fn record_sent(&self, key: &DedupKey, at: DateTime<Utc>) -> Result<bool>;

    /// Record `key` and persist `message` in one write
    ///
    /// Returns `None`, and stores nothing, if `key` already has an entry. If
    /// the message cannot be persisted, `key` is not recorded either.
    ///
    /// # Errors
    /// If the store cannot be written
    async fn enqueue_once(
        &self,
        key: &DedupKey,
        at: DateTime<Utc>,
        message: NewMessage,
    ) -> Result<Option<MessageId>>;

    /// Forget `key`, so the notification may be sent again
    ///
    /// # Errors
    /// If the store cannot be written
    async fn forget(&self, key: &DedupKey) -> Result<bool>;
}

/// Everything the delivery subsystem persists
pub trait Store: MessageStore + StatusStore + DedupLog {}

impl<T> Store for T where T: MessageStore + StatusStore + DedupLog {}
