//! Delivery worker behaviour against a scripted channel
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use courier_delivery::{
    ABANDONED, ChannelError, DeliveryConfig, DeliveryWorker, NotificationService, ServiceError,
    sweep,
};
use courier_store::{
    DedupKey, DedupLog, EnqueueOptions, MemoryStore, MessageStatus, MessageStore, Store,
    Transition, ValidationError, message::now,
};
use pretty_assertions::assert_eq;
use support::{MockChannel, service, service_with, test_config};

#[tokio::test]
async fn successful_send_marks_message_sent() {
    let channel = MockChannel::ready();
    let (service, _) = service(&channel);

    let id = service
        .enqueue("+15550100", "Your order shipped", EnqueueOptions::default())
        .await
        .expect("enqueue");

    let report = service.tick().await;
    assert_eq!(report.sent, 1);

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Sent);
    assert!(message.processed_at.is_some());
    assert!(message.claimed_at.is_none());

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "+15550100");
    assert_eq!(sent[0].body, "Your order shipped");

    let status = service.get_status().await.expect("status");
    assert_eq!(status.message_count, 1);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.pending_count, 0);
}

#[tokio::test]
async fn failed_send_is_rescheduled() {
    let channel = MockChannel::builder()
        .with_result(Err(ChannelError::Transport("connection reset".to_string())))
        .build();
    let (service, _) = service(&channel);

    let id = service
        .enqueue("+15550100", "hello", EnqueueOptions::default())
        .await
        .expect("enqueue");

    let start = now();
    let report = service.worker().tick_at(start).await;
    assert_eq!(report.retried, 1);

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.retry_count, 1);
    assert!(message.scheduled_at >= start + TimeDelta::seconds(60));
    assert!(
        message
            .error_message
            .as_deref()
            .is_some_and(|e| e.contains("connection reset"))
    );

    // Not eligible again until the backoff has elapsed
    let report = service.worker().tick_at(start).await;
    assert_eq!(report.selected, 0);
    assert_eq!(channel.send_count(), 1);

    let report = service
        .worker()
        .tick_at(start + TimeDelta::minutes(2))
        .await;
    assert_eq!(report.sent, 1);
    assert_eq!(
        service.get(&id).await.expect("message").status,
        MessageStatus::Sent
    );
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_message() {
    let channel = MockChannel::ready();
    channel.fail_next(4);
    let (service, _) = service(&channel);

    let id = service
        .enqueue("+15550100", "hello", EnqueueOptions::default())
        .await
        .expect("enqueue");

    let start = now();
    for attempt in 0..4 {
        let at = start + TimeDelta::minutes(2 * attempt);
        service.worker().tick_at(at).await;
    }

    assert_eq!(channel.send_count(), 4);

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.retry_count, 3);
    assert!(message.processed_at.is_some());

    let status = service.get_status().await.expect("status");
    assert_eq!(status.error_count, 1);
    assert_eq!(status.message_count, 0);

    let failed = service.list_failed().await.expect("failed messages");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert_eq!(failed[0].retry_count, 3);
    assert!(failed[0].error_message.is_some());

    // Terminal: later ticks leave it alone
    service
        .worker()
        .tick_at(start + TimeDelta::hours(1))
        .await;
    assert_eq!(channel.send_count(), 4);
}

#[tokio::test]
async fn per_message_retry_budget_is_honoured() {
    let channel = MockChannel::ready();
    channel.fail_next(1);
    let (service, _) = service(&channel);

    let id = service
        .enqueue(
            "+15550100",
            "one shot",
            EnqueueOptions::default().with_max_retries(0),
        )
        .await
        .expect("enqueue");

    let report = service.tick().await;
    assert_eq!(report.failed, 1);
    assert_eq!(
        service.get(&id).await.expect("message").status,
        MessageStatus::Failed
    );
}

#[tokio::test]
async fn not_ready_channel_changes_nothing() {
    let channel = MockChannel::builder().not_ready().build();
    let (service, store) = service(&channel);

    let fresh = service
        .enqueue("+15550100", "hello", EnqueueOptions::default())
        .await
        .expect("enqueue");
    let retried = service
        .enqueue("+15550101", "hello again", EnqueueOptions::default())
        .await
        .expect("enqueue");

    // One earlier failure, due again now
    let at = now();
    store
        .transition(&retried, &Transition::Claim { at })
        .await
        .expect("claim");
    store
        .transition(
            &retried,
            &Transition::Reschedule {
                retry_count: 1,
                scheduled_at: at,
                error: "Transport error: socket closed".to_string(),
            },
        )
        .await
        .expect("reschedule");

    let before = [
        service.get(&fresh).await.expect("message"),
        service.get(&retried).await.expect("message"),
    ];

    for tick in 0..5 {
        let report = if tick % 2 == 0 {
            service.tick().await
        } else {
            service
                .worker()
                .tick_at(now() + TimeDelta::hours(tick))
                .await
        };

        assert!(!report.channel_ready);
        assert_eq!(report.selected, 0);
        assert_eq!(report.attempted(), 0);
        assert_eq!(
            [
                service.get(&fresh).await.expect("message"),
                service.get(&retried).await.expect("message"),
            ],
            before
        );
    }
    assert_eq!(channel.send_count(), 0);
    assert_eq!(before[1].retry_count, 1);
    assert_eq!(before[1].scheduled_at, at);

    channel.set_ready(true);
    assert_eq!(service.tick().await.sent, 2);
}

#[tokio::test]
async fn batch_follows_priority_and_size() {
    let channel = MockChannel::ready();
    let config = DeliveryConfig {
        batch_size: 2,
        ..test_config()
    };
    let (service, _) = service_with(&channel, config);

    for (body, priority) in [("low", 0), ("high", 10), ("medium", 5)] {
        service
            .enqueue(
                "+15550100",
                body,
                EnqueueOptions::default().with_priority(priority),
            )
            .await
            .expect("enqueue");
    }

    let report = service.tick().await;
    assert_eq!(report.selected, 2);
    assert_eq!(report.sent, 2);

    let bodies: Vec<_> = channel.sent().into_iter().map(|s| s.body).collect();
    assert_eq!(bodies, vec!["high", "medium"]);

    assert_eq!(service.tick().await.sent, 1);
    assert_eq!(channel.sent()[2].body, "low");
}

#[tokio::test]
async fn future_scheduled_message_waits() {
    let channel = MockChannel::ready();
    let (service, _) = service(&channel);

    let start = now();
    let id = service
        .enqueue(
            "+15550100",
            "reminder",
            EnqueueOptions::default().scheduled_at(start + TimeDelta::hours(1)),
        )
        .await
        .expect("enqueue");

    assert_eq!(service.worker().tick_at(start).await.selected, 0);
    assert_eq!(
        service.get(&id).await.expect("message").status,
        MessageStatus::Pending
    );

    let report = service
        .worker()
        .tick_at(start + TimeDelta::hours(2))
        .await;
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn invalid_input_is_rejected_without_persisting() {
    let channel = MockChannel::ready();
    let (service, store) = service(&channel);

    let result = service
        .enqueue("", "hello", EnqueueOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(ServiceError::Validation(ValidationError::EmptyRecipient))
    ));

    let result = service
        .enqueue("+15550100", "   ", EnqueueOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(ServiceError::Validation(ValidationError::EmptyBody))
    ));

    assert!(store.list_pending().await.expect("pending").is_empty());
}

#[tokio::test]
async fn retry_requeues_failed_message() {
    let channel = MockChannel::ready();
    channel.fail_next(1);
    let (service, _) = service(&channel);

    let id = service
        .enqueue(
            "+15550100",
            "hello",
            EnqueueOptions::default().with_max_retries(0),
        )
        .await
        .expect("enqueue");
    service.tick().await;
    assert_eq!(
        service.get(&id).await.expect("message").status,
        MessageStatus::Failed
    );

    assert!(service.retry(&id).await.expect("retry"));

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.retry_count, 0);
    assert!(message.processed_at.is_none());

    // Requeued at the current time, so the next tick picks it up
    assert_eq!(service.tick().await.sent, 1);

    // Only failed messages can be retried
    assert!(!service.retry(&id).await.expect("retry"));
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_messages() {
    let channel = MockChannel::ready();
    let (service, store) = service(&channel);

    let sent = service
        .enqueue("+15550100", "done", EnqueueOptions::default())
        .await
        .expect("enqueue");
    service.tick().await;

    let pending = service
        .enqueue(
            "+15550100",
            "later",
            EnqueueOptions::default().scheduled_at(now() + TimeDelta::days(30)),
        )
        .await
        .expect("enqueue");

    // Nothing is old enough yet
    assert_eq!(
        service
            .cleanup(Duration::from_secs(7 * 86_400))
            .await
            .expect("cleanup"),
        0
    );

    let later = now() + TimeDelta::days(8);
    let deleted = sweep(store.as_ref(), Duration::from_secs(7 * 86_400), later)
        .await
        .expect("sweep");
    assert_eq!(deleted, 1);

    assert!(service.get(&sent).await.is_err());
    assert_eq!(
        service.get(&pending).await.expect("message").status,
        MessageStatus::Pending
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_workers_deliver_each_message_once() {
    let channel = MockChannel::builder()
        .with_delay(Duration::from_millis(5))
        .build();
    let (service, store) = service(&channel);

    for i in 0..20 {
        service
            .enqueue("+15550100", format!("message {i}"), EnqueueOptions::default())
            .await
            .expect("enqueue");
    }

    let config = DeliveryConfig {
        batch_size: 20,
        ..test_config()
    };
    let workers: Vec<_> = (0..3)
        .map(|_| {
            DeliveryWorker::new(
                Arc::clone(&store),
                Arc::clone(&channel) as Arc<dyn courier_delivery::ChannelClient>,
                config.clone(),
            )
        })
        .collect();

    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| tokio::spawn(async move { worker.tick().await }))
        .collect();

    let mut sent = 0;
    for handle in handles {
        sent += handle.await.expect("tick task").sent;
    }

    assert_eq!(sent, 20);
    assert_eq!(channel.send_count(), 20);
    assert_eq!(
        store
            .count_by_status(MessageStatus::Sent)
            .await
            .expect("count"),
        20
    );
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let channel = MockChannel::builder()
        .with_delay(Duration::from_millis(200))
        .build();
    let (service, _) = service(&channel);

    service
        .enqueue("+15550100", "slow", EnqueueOptions::default())
        .await
        .expect("enqueue");

    let (first, second) = tokio::join!(service.tick(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.tick().await
    });

    assert!(!first.skipped);
    assert_eq!(first.sent, 1);
    assert!(second.skipped);
    assert_eq!(channel.send_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn starting_twice_runs_one_loop() {
    let channel = MockChannel::builder()
        .with_delay(Duration::from_millis(20))
        .build();
    let (service, _) = service(&channel);

    for i in 0..5 {
        service
            .enqueue("+15550100", format!("message {i}"), EnqueueOptions::default())
            .await
            .expect("enqueue");
    }

    assert!(service.start_processing(Duration::from_millis(10)));
    assert!(!service.start_processing(Duration::from_millis(10)));
    assert!(service.worker().is_running());

    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.send_count() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop delivers everything");

    service.stop_processing_and_wait().await;
    assert!(!service.worker().is_running());
    assert!(!service.stop_processing());

    assert_eq!(channel.send_count(), 5);
    assert_eq!(channel.peak_in_flight(), 1);

    // Restartable after a stop
    assert!(service.start_processing(Duration::from_millis(10)));
    assert!(service.stop_processing());
}

#[tokio::test(start_paused = true)]
async fn slow_send_times_out_and_is_retried() {
    let channel = MockChannel::builder()
        .with_delay(Duration::from_secs(120))
        .build();
    let config = DeliveryConfig {
        send_timeout_secs: 30,
        ..test_config()
    };
    let (service, _) = service_with(&channel, config);

    let id = service
        .enqueue("+15550100", "hello", EnqueueOptions::default())
        .await
        .expect("enqueue");

    let report = service.tick().await;
    assert_eq!(report.retried, 1);

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.retry_count, 1);
    assert!(
        message
            .error_message
            .as_deref()
            .is_some_and(|e| e.contains("timed out"))
    );
}

#[tokio::test]
async fn stalled_claim_is_recovered() {
    let channel = MockChannel::ready();
    let (service, store) = service(&channel);

    let id = service
        .enqueue("+15550100", "hello", EnqueueOptions::default())
        .await
        .expect("enqueue");

    // A worker that died mid-send an hour ago
    store
        .transition(
            &id,
            &Transition::Claim {
                at: now() - TimeDelta::hours(1),
            },
        )
        .await
        .expect("claim");

    assert_eq!(service.tick().await.selected, 0);

    let recovered = service
        .recover_stalled(Duration::from_secs(600))
        .await
        .expect("recovery");
    assert_eq!(recovered, 1);

    let message = service.get(&id).await.expect("message");
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.retry_count, 1);
    assert_eq!(message.error_message.as_deref(), Some(ABANDONED));
    assert!(message.claimed_at.is_none());
}

#[tokio::test]
async fn enqueue_once_deduplicates() {
    let channel = MockChannel::ready();
    let (service, store) = service(&channel);
    let key = DedupKey::new("subscription-42", "expiry-warning");

    let first = service
        .enqueue_once(&key, "+15550100", "expires soon", EnqueueOptions::default())
        .await
        .expect("enqueue");
    assert!(first.is_some());

    let second = service
        .enqueue_once(&key, "+15550100", "expires soon", EnqueueOptions::default())
        .await
        .expect("enqueue");
    assert!(second.is_none());

    assert_eq!(store.list_pending().await.expect("pending").len(), 1);
    assert!(store.was_already_sent(&key).await.expect("dedup"));
}

#[tokio::test]
async fn enqueue_once_keeps_key_free_when_store_rejects_message() {
    let channel = MockChannel::ready();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::with_capacity(0));
    let service = NotificationService::new(
        Arc::clone(&store),
        Arc::clone(&channel) as Arc<dyn courier_delivery::ChannelClient>,
        test_config(),
    );
    let key = DedupKey::new("subscription-42", "expiry-warning");

    let result = service
        .enqueue_once(&key, "+15550100", "expires soon", EnqueueOptions::default())
        .await;
    assert!(matches!(result, Err(ServiceError::Store(_))));
    assert!(!store.was_already_sent(&key).await.expect("dedup"));
}

#[tokio::test]
async fn enqueue_once_records_nothing_for_invalid_input() {
    let channel = MockChannel::ready();
    let (service, store) = service(&channel);
    let key = DedupKey::new("subscription-42", "expiry-warning");

    let result = service
        .enqueue_once(&key, "+15550100", "", EnqueueOptions::default())
        .await;
    assert!(result.is_err());
    assert!(!store.was_already_sent(&key).await.expect("dedup"));

    let retried = service
        .enqueue_once(&key, "+15550100", "expires soon", EnqueueOptions::default())
        .await
        .expect("enqueue");
    assert!(retried.is_some());
}
