use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;

use crate::{
    ChannelStatusRecord, DedupKey, Message, MessageId, MessageStatus, NewMessage, Result,
    StoreError, Transition, TransitionOutcome,
    r#trait::{DedupLog, MessageStore, StatusStore},
    select::{eligibility_order, select_eligible},
};

/// In-memory store implementation
///
/// Messages live in a `DashMap`; a conditional transition holds the entry's
/// shard lock while it compares and updates the status, so concurrent
/// claimants on one message are serialised. Nothing survives a restart, so
/// this is meant for tests and development.
///
/// # Capacity Management
/// An optional capacity bounds the number of stored messages; `enqueue`
/// fails once it is reached. A slot is reserved before the message is
/// inserted, so concurrent producers cannot overshoot the limit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) messages: Arc<DashMap<MessageId, Message>>,
    status: Arc<Mutex<ChannelStatusRecord>>,
    dedup: Arc<DashMap<DedupKey, DateTime<Utc>>>,
    /// Maximum number of messages to store (None = unlimited)
    capacity: Option<usize>,
    /// Slots taken under `capacity`; only maintained when it is set
    reserved: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Get the current number of messages in the store
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn reserve_slot(&self) -> Result<()> {
        let Some(cap) = self.capacity else {
            return Ok(());
        };

        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < cap).then_some(held + 1)
            })
            .map(|_| ())
            .map_err(|held| {
                StoreError::Internal(format!(
                    "Memory store capacity exceeded: {held}/{cap} messages"
                ))
            })
    }

    fn release_slots(&self, count: usize) {
        if self.capacity.is_some() {
            self.reserved.fetch_sub(count, Ordering::AcqRel);
        }
    }

    fn insert(&self, message: NewMessage) -> Result<MessageId> {
        self.reserve_slot()?;

        let id = MessageId::generate();
        self.messages
            .insert(id.clone(), Message::from_new(id.clone(), message));

        Ok(id)
    }

    fn count_terminal(&self, status: MessageStatus) {
        match status {
            MessageStatus::Sent => self.status.lock().message_count += 1,
            MessageStatus::Failed => self.status.lock().error_count += 1,
            MessageStatus::Pending | MessageStatus::Processing => {}
        }
    }

    fn collect<F>(&self, filter: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        self.messages
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn enqueue(&self, message: NewMessage) -> Result<MessageId> {
        self.insert(message)
    }

    async fn get(&self, id: &MessageId) -> Result<Message> {
        self.messages
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_pending(&self) -> Result<Vec<Message>> {
        let mut pending = self.collect(|m| m.status == MessageStatus::Pending);
        pending.sort_by(eligibility_order);
        Ok(pending)
    }

    async fn list_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Message>> {
        Ok(select_eligible(
            self.collect(|m| m.status == MessageStatus::Pending),
            now,
            limit,
        ))
    }

    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<Message>> {
        let mut messages = self.collect(|m| m.status == status);
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn count_by_status(&self, status: MessageStatus) -> Result<usize> {
        Ok(self
            .messages
            .iter()
            .filter(|entry| entry.value().status == status)
            .count())
    }

    async fn list_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Message>> {
        let mut stalled = self.collect(|m| {
            m.status == MessageStatus::Processing
                && m.claimed_at.is_some_and(|claimed| claimed < claimed_before)
        });
        stalled.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
        Ok(stalled)
    }

    async fn transition(
        &self,
        id: &MessageId,
        transition: &Transition,
    ) -> Result<TransitionOutcome> {
        Ok(self
            .messages
            .get_mut(id)
            .map_or(TransitionOutcome::NotApplicable, |mut entry| {
                transition.apply(entry.value_mut())
            }))
    }

    async fn settle(
        &self,
        id: &MessageId,
        claimed_at: DateTime<Utc>,
        transition: &Transition,
    ) -> Result<TransitionOutcome> {
        transition.ensure_settles_claim()?;

        let Some(mut entry) = self.messages.get_mut(id) else {
            return Ok(TransitionOutcome::NotApplicable);
        };

        // Counted while the entry is still locked
        let outcome = transition.apply_claimed(entry.value_mut(), claimed_at);
        if outcome.is_applied() {
            self.count_terminal(transition.to());
        }

        Ok(outcome)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;
        self.messages.retain(|_, message| {
            let expired = message.status.is_terminal()
                && message.processed_at.is_some_and(|processed| processed < cutoff);
            deleted += usize::from(expired);
            !expired
        });

        self.release_slots(deleted);
        Ok(deleted)
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn load_status(&self) -> Result<ChannelStatusRecord> {
        Ok(self.status.lock().clone())
    }

    async fn set_ready(&self, ready: bool, at: DateTime<Utc>) -> Result<()> {
        let mut status = self.status.lock();
        status.is_ready = ready;
        status.last_heartbeat = Some(at);
        Ok(())
    }

    async fn heartbeat(&self, at: DateTime<Utc>) -> Result<()> {
        self.status.lock().last_heartbeat = Some(at);
        Ok(())
    }
}

#[async_trait]
impl DedupLog for MemoryStore {
    async fn was_already_sent(&self, key: &DedupKey) -> Result<bool> {
        Ok(self.dedup.contains_key(key))
    }

    async fn record_sent(&self, key: &DedupKey, at: DateTime<Utc>) -> Result<bool> {
        Ok(match self.dedup.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(at);
                true
            }
        })
    }

    async fn enqueue_once(
        &self,
        key: &DedupKey,
        at: DateTime<Utc>,
        message: NewMessage,
    ) -> Result<Option<MessageId>> {
        match self.dedup.entry(key.clone()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(vacant) => {
                let id = self.insert(message)?;
                vacant.insert(at);
                Ok(Some(id))
            }
        }
    }

    async fn forget(&self, key: &DedupKey) -> Result<bool> {
        Ok(self.dedup.remove(key).is_some())
    }
}
