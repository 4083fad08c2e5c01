//! Eligibility selection
//!
//! A message is eligible when it is `pending` and its `scheduled_at` has
//! passed. Eligible messages are delivered by priority (highest first), then
//! oldest first, with the id as the final tiebreaker so the order is total.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{Message, MessageStatus};

/// Delivery order between two messages
#[must_use]
pub fn eligibility_order(a: &Message, b: &Message) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[must_use]
pub fn is_eligible(message: &Message, now: DateTime<Utc>) -> bool {
    message.status == MessageStatus::Pending && message.scheduled_at <= now
}

/// Pick at most `limit` eligible messages, in delivery order
pub fn select_eligible<I>(messages: I, now: DateTime<Utc>, limit: usize) -> Vec<Message>
where
    I: IntoIterator<Item = Message>,
{
    let mut eligible: Vec<Message> = messages
        .into_iter()
        .filter(|message| is_eligible(message, now))
        .collect();

    eligible.sort_by(eligibility_order);
    eligible.truncate(limit);
    eligible
}
