//! Shared fixtures for delivery integration tests
#![allow(dead_code)]

pub mod mock_channel;

use std::sync::Arc;

use courier_delivery::{Backoff, DeliveryConfig, NotificationService, RetryPolicy};
use courier_store::{MemoryStore, Store};

pub use mock_channel::MockChannel;

/// Worker configuration with a one-minute fixed backoff
pub fn test_config() -> DeliveryConfig {
    DeliveryConfig {
        retry: RetryPolicy {
            default_max_retries: 3,
            backoff: Backoff::Fixed { delay_secs: 60 },
        },
        ..DeliveryConfig::default()
    }
}

/// A service over a fresh in-memory store
pub fn service(channel: &Arc<MockChannel>) -> (NotificationService, Arc<dyn Store>) {
    service_with(channel, test_config())
}

pub fn service_with(
    channel: &Arc<MockChannel>,
    config: DeliveryConfig,
) -> (NotificationService, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let service = NotificationService::new(
        Arc::clone(&store),
        Arc::clone(channel) as Arc<dyn courier_delivery::ChannelClient>,
        config,
    );
    (service, store)
}
