//! Producer and operator facade
//!
//! [`NotificationService`] is the one object producers and operators hold.
//! It is constructed explicitly and passed around; there is no global
//! instance.

use std::{sync::Arc, time::Duration};

use courier_store::{
    DedupKey, DedupLog, EnqueueOptions, Message, MessageId, MessageStatus, MessageStore,
    NewMessage, Store, StoreError, Transition, message::now,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    channel::ChannelClient,
    error::{MaintenanceError, ServiceError},
    processor::{DeliveryConfig, DeliveryWorker, TickReport, cleanup, recovery},
    status::{ChannelStatus, StatusTracker},
};

/// A permanently failed message, as listed for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMessage {
    pub id: MessageId,
    pub recipient: String,
    pub body: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl From<Message> for FailedMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            recipient: message.recipient,
            body: message.body,
            error_message: message.error_message,
            retry_count: message.retry_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationService {
    store: Arc<dyn Store>,
    worker: DeliveryWorker,
    status: StatusTracker,
}

impl NotificationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn ChannelClient>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            worker: DeliveryWorker::new(Arc::clone(&store), channel, config),
            status: StatusTracker::new(Arc::clone(&store)),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub const fn worker(&self) -> &DeliveryWorker {
        &self.worker
    }

    #[must_use]
    pub const fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    /// Queue a message for delivery
    ///
    /// Returns as soon as the message is persisted; delivery happens on a
    /// later tick.
    ///
    /// # Errors
    /// [`ServiceError::Validation`] if the recipient or body is empty, in
    /// which case nothing is stored
    pub async fn enqueue(
        &self,
        recipient: impl Into<String>,
        body: impl Into<String>,
        options: EnqueueOptions,
    ) -> Result<MessageId, ServiceError> {
        let message = NewMessage::new(
            recipient,
            body,
            options,
            self.worker.config().retry.default_max_retries,
        )?;

        let id = self.store.enqueue(message).await?;
        debug!(message_id = %id, "Message enqueued");

        Ok(id)
    }

    /// Queue a message unless one was already queued for `key`
    ///
    /// The dedup entry and the message are stored in one write, so of two
    /// producers racing on the same key exactly one enqueues, and a crash
    /// can never leave the key recorded without its message. Returns `None`
    /// if the notification was already sent.
    ///
    /// # Errors
    /// As for [`Self::enqueue`]; on failure the key is not recorded
    pub async fn enqueue_once(
        &self,
        key: &DedupKey,
        recipient: impl Into<String>,
        body: impl Into<String>,
        options: EnqueueOptions,
    ) -> Result<Option<MessageId>, ServiceError> {
        let message = NewMessage::new(
            recipient,
            body,
            options,
            self.worker.config().retry.default_max_retries,
        )?;

        let id = self.store.enqueue_once(key, now(), message).await?;
        match &id {
            Some(id) => debug!(message_id = %id, key = %key, "Message enqueued"),
            None => debug!(key = %key, "Notification already sent, skipping"),
        }

        Ok(id)
    }

    /// # Errors
    /// [`StoreError::NotFound`] if no message has this id
    pub async fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.store.get(id).await
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn get_status(&self) -> Result<ChannelStatus, StoreError> {
        self.status.get_status().await
    }

    /// Move a `failed` message back to `pending` with a fresh retry budget
    ///
    /// Returns `false` if the message does not exist or is not `failed`.
    ///
    /// # Errors
    /// If the store cannot be written
    pub async fn retry(&self, id: &MessageId) -> Result<bool, MaintenanceError> {
        let applied = self
            .store
            .transition(id, &Transition::Requeue { at: now() })
            .await?
            .is_applied();

        if applied {
            info!(message_id = %id, "Failed message requeued");
        } else {
            debug!(message_id = %id, "Retry requested for a message that is not failed");
        }

        Ok(applied)
    }

    /// Every `failed` message, oldest first
    ///
    /// # Errors
    /// If the store cannot be read
    pub async fn list_failed(&self) -> Result<Vec<FailedMessage>, StoreError> {
        Ok(self
            .store
            .list_by_status(MessageStatus::Failed)
            .await?
            .into_iter()
            .map(FailedMessage::from)
            .collect())
    }

    /// Start the delivery worker; `false` if it was already running
    pub fn start_processing(&self, tick_interval: Duration) -> bool {
        self.worker.start(tick_interval)
    }

    /// Stop the delivery worker; `false` if it was not running
    pub fn stop_processing(&self) -> bool {
        self.worker.stop()
    }

    /// Stop the delivery worker and wait for the in-flight tick
    pub async fn stop_processing_and_wait(&self) {
        self.worker.stop_and_wait().await;
    }

    /// Run one delivery tick now
    pub async fn tick(&self) -> TickReport {
        self.worker.tick().await
    }

    /// Delete terminal messages older than `retention_window`
    ///
    /// # Errors
    /// If the store cannot be written
    pub async fn cleanup(&self, retention_window: Duration) -> Result<usize, MaintenanceError> {
        let deleted = cleanup::sweep(self.store.as_ref(), retention_window, now()).await?;
        info!(deleted, "Cleanup complete");
        Ok(deleted)
    }

    /// Recover messages stuck in `processing` for longer than `timeout`
    ///
    /// # Errors
    /// If the store cannot be read or written
    pub async fn recover_stalled(&self, timeout: Duration) -> Result<usize, MaintenanceError> {
        recovery::recover_stalled(
            self.store.as_ref(),
            &self.worker.config().retry,
            timeout,
            now(),
        )
        .await
    }
}
