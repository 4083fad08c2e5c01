//! Batch processing for one delivery tick

use chrono::{DateTime, Utc};
use courier_store::{
    Message, MessageStatus, MessageStore, Store, StoreError, Transition, TransitionOutcome,
};
use tracing::{debug, error, warn};

use crate::{
    channel::ChannelClient,
    error::{ChannelError, DeliveryError},
    policy::{AttemptOutcome, Decision},
    processor::{TickReport, WorkerInner},
};

/// Deliver up to `batch_size` eligible messages, one at a time
///
/// Channel errors are routed through the retry policy and never end the
/// batch early. If the channel stops being ready mid-batch, the remaining
/// messages are left `pending` for a later tick.
#[tracing::instrument(level = "debug", skip(worker), fields(batch_size = worker.config.batch_size))]
pub(crate) async fn process_batch(worker: &WorkerInner, now: DateTime<Utc>) -> TickReport {
    let mut report = TickReport {
        channel_ready: worker.channel.is_ready(),
        ..TickReport::default()
    };

    if !report.channel_ready {
        return report;
    }

    let batch = match worker
        .store
        .list_eligible(now, worker.config.batch_size)
        .await
    {
        Ok(batch) => batch,
        Err(e) => {
            error!(error = %e, "Failed to select eligible messages");
            report.errors += 1;
            return report;
        }
    };

    report.selected = batch.len();

    for message in batch {
        if !worker.channel.is_ready() {
            debug!("Channel became unavailable, deferring the rest of the batch");
            break;
        }

        deliver_one(worker, message, now, &mut report).await;
    }

    report
}

async fn deliver_one(
    worker: &WorkerInner,
    message: Message,
    now: DateTime<Utc>,
    report: &mut TickReport,
) {
    match worker
        .store
        .transition(&message.id, &Transition::Claim { at: now })
        .await
    {
        Ok(TransitionOutcome::Applied) => {}
        Ok(TransitionOutcome::NotApplicable) => {
            debug!(message_id = %message.id, "Message claimed elsewhere, skipping");
            report.lost_claims += 1;
            return;
        }
        Err(e) => {
            error!(message_id = %message.id, error = %e, "Failed to claim message");
            report.errors += 1;
            return;
        }
    }

    let outcome = attempt(worker.channel.as_ref(), &message, worker.config.send_timeout()).await;

    // Never earlier than the tick's own clock
    let finished = now.max(courier_store::message::now());
    let decision = worker.config.retry.decide(&message, outcome, finished);

    match settle(worker.store.as_ref(), &message, now, decision).await {
        Ok(Some(MessageStatus::Sent)) => report.sent += 1,
        Ok(Some(MessageStatus::Pending)) => report.retried += 1,
        Ok(Some(MessageStatus::Failed)) => report.failed += 1,
        Ok(_) => report.lost_claims += 1,
        Err(e) => {
            error!(
                message_id = %message.id,
                error = %e,
                "Failed to record delivery result, message stays processing until stall recovery"
            );
            report.errors += 1;
        }
    }
}

/// One bounded send
async fn attempt(
    channel: &dyn ChannelClient,
    message: &Message,
    timeout: std::time::Duration,
) -> AttemptOutcome {
    match tokio::time::timeout(timeout, channel.send(&message.recipient, &message.body)).await {
        Ok(Ok(())) => AttemptOutcome::Delivered,
        Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
        Err(_) => AttemptOutcome::Failed(ChannelError::Timeout(timeout).to_string()),
    }
}

/// Persist `decision` for the claim on `message` made at `claimed_at`
///
/// The store counts the message in the channel status in the same write when
/// it reaches `sent` or `failed`. Returns the new status, or `None` if that
/// claim no longer holds (another actor recovered the message first).
pub(crate) async fn settle(
    store: &dyn Store,
    message: &Message,
    claimed_at: DateTime<Utc>,
    decision: Decision,
) -> Result<Option<MessageStatus>, StoreError> {
    let status = decision.next_status();

    let failure = match &decision {
        Decision::Sent { .. } => None,
        Decision::Retry {
            retry_count, error, ..
        } => Some(DeliveryError::Transient {
            id: message.id.clone(),
            retry_count: *retry_count,
            max_retries: message.max_retries,
            reason: error.clone(),
        }),
        Decision::Failed { error, .. } => Some(DeliveryError::Permanent {
            id: message.id.clone(),
            attempts: message.retry_count + 1,
            reason: error.clone(),
        }),
    };

    let outcome = store
        .settle(&message.id, claimed_at, &decision.into_transition())
        .await?;

    if !outcome.is_applied() {
        warn!(
            message_id = %message.id,
            claimed_at = %claimed_at,
            "Claim released before its result was recorded, discarding result"
        );
        return Ok(None);
    }

    match status {
        MessageStatus::Sent => {
            debug!(message_id = %message.id, "Message delivered");
        }
        MessageStatus::Failed => {
            if let Some(e) = &failure {
                error!(message_id = %message.id, error = %e, "Message failed permanently");
            }
        }
        MessageStatus::Pending | MessageStatus::Processing => {
            if let Some(e) = &failure {
                warn!(message_id = %message.id, error = %e, "Delivery attempt failed, rescheduled");
            }
        }
    }

    Ok(Some(status))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use courier_store::{EnqueueOptions, MemoryStore, NewMessage, StatusStore, message::now};

    use super::*;
    use crate::policy::RetryPolicy;

    async fn claimed(store: &MemoryStore) -> (Message, DateTime<Utc>) {
        let at = now();
        let id = store
            .enqueue(
                NewMessage::new("+15550100", "hello", EnqueueOptions::default(), 3)
                    .expect("valid message"),
            )
            .await
            .expect("enqueue");
        store
            .transition(&id, &Transition::Claim { at })
            .await
            .expect("claim");
        (store.get(&id).await.expect("message"), at)
    }

    #[tokio::test]
    async fn test_settle_counts_terminal_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let policy = RetryPolicy::default();

        let (message, at) = claimed(&store).await;
        let decision = policy.decide(&message, AttemptOutcome::Delivered, now());
        assert_eq!(
            settle(store.as_ref(), &message, at, decision)
                .await
                .expect("settle"),
            Some(MessageStatus::Sent)
        );

        let (mut message, at) = claimed(&store).await;
        message.retry_count = message.max_retries;
        let decision = policy.decide(&message, AttemptOutcome::Failed("down".to_string()), now());
        assert_eq!(
            settle(store.as_ref(), &message, at, decision)
                .await
                .expect("settle"),
            Some(MessageStatus::Failed)
        );

        let status = store.load_status().await.expect("status");
        assert_eq!(status.message_count, 1);
        assert_eq!(status.error_count, 1);
    }

    #[tokio::test]
    async fn test_settle_discards_result_for_released_message() {
        let store = Arc::new(MemoryStore::new());
        let (message, at) = claimed(&store).await;

        // Someone else already resolved it
        store
            .transition(&message.id, &Transition::Deliver { at: now() })
            .await
            .expect("deliver");

        let decision = RetryPolicy::default().decide(&message, AttemptOutcome::Delivered, now());
        assert_eq!(
            settle(store.as_ref(), &message, at, decision)
                .await
                .expect("settle"),
            None
        );
        assert_eq!(
            store.load_status().await.expect("status").message_count,
            0
        );
    }
}
