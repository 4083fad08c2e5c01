//! Channel status tracking
//!
//! Readiness and the lifetime counters are persisted in the store so that
//! `courierctl status` sees the same numbers as the running daemon. The
//! pending count is always computed live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_common::{Signal, internal};
use courier_store::{MessageStatus, MessageStore, Result, StatusStore, Store, message::now};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::channel::{ChannelClient, ChannelEvent};

/// Snapshot returned by [`StatusTracker::get_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub is_ready: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Messages that reached `sent`
    pub message_count: u64,
    /// Messages that reached `failed`
    pub error_count: u64,
    /// Messages currently `pending`
    pub pending_count: usize,
}

#[derive(Debug, Clone)]
pub struct StatusTracker {
    store: Arc<dyn Store>,
}

impl StatusTracker {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a readiness change; also refreshes the heartbeat
    ///
    /// # Errors
    /// If the store cannot be written
    pub async fn set_ready(&self, ready: bool) -> Result<()> {
        self.store.set_ready(ready, now()).await
    }

    /// # Errors
    /// If the store cannot be written
    pub async fn heartbeat(&self) -> Result<()> {
        self.store.heartbeat(now()).await
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn get_status(&self) -> Result<ChannelStatus> {
        let record = self.store.load_status().await?;
        let pending_count = self.store.count_by_status(MessageStatus::Pending).await?;

        Ok(ChannelStatus {
            is_ready: record.is_ready,
            last_heartbeat: record.last_heartbeat,
            message_count: record.message_count,
            error_count: record.error_count,
            pending_count,
        })
    }

    /// Mirror `channel`'s readiness events into the store until shutdown
    pub async fn observe(
        &self,
        channel: Arc<dyn ChannelClient>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        let mut events = channel.subscribe();
        Self::record(self.set_ready(channel.is_ready()).await);

        internal!("Observing channel readiness");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ChannelEvent::Ready) => {
                        info!("Channel ready");
                        Self::record(self.set_ready(true).await);
                    }
                    Ok(ChannelEvent::Disconnected) => {
                        warn!("Channel disconnected");
                        Self::record(self.set_ready(false).await);
                    }
                    Ok(ChannelEvent::Heartbeat) => {
                        Self::record(self.heartbeat().await);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Missed channel events, resynchronising readiness");
                        Self::record(self.set_ready(channel.is_ready()).await);
                    }
                    Err(RecvError::Closed) => {
                        internal!("Channel event stream closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    internal!("Status tracker received shutdown signal");
                    break;
                }
            }
        }
    }

    fn record(result: Result<()>) {
        if let Err(e) = result {
            error!(error = %e, "Failed to persist channel status");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use courier_store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn test_status_starts_not_ready() {
        let tracker = StatusTracker::new(Arc::new(MemoryStore::new()));
        let status = tracker.get_status().await.expect("status");

        assert!(!status.is_ready);
        assert!(status.last_heartbeat.is_none());
        assert_eq!(status.message_count, 0);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test]
    async fn test_set_ready_refreshes_heartbeat() {
        let tracker = StatusTracker::new(Arc::new(MemoryStore::new()));

        tracker.set_ready(true).await.expect("set ready");
        let status = tracker.get_status().await.expect("status");
        assert!(status.is_ready);
        let first = status.last_heartbeat.expect("heartbeat recorded");

        tracker.heartbeat().await.expect("heartbeat");
        let status = tracker.get_status().await.expect("status");
        assert!(status.is_ready);
        assert!(status.last_heartbeat.expect("heartbeat recorded") >= first);
    }
}
