//! Channel client adapter
//!
//! A channel is whatever actually carries a message to its recipient (an SMS
//! gateway, a chat bot session). The delivery worker only needs to know
//! whether it is connected and to hand it one message at a time.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use courier_common::outgoing;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::ChannelError;

/// Readiness notifications published by a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connected and able to send
    Ready,
    /// Connection lost; sends will fail until the next `Ready`
    Disconnected,
    /// Still alive; readiness unchanged
    Heartbeat,
}

#[async_trait]
pub trait ChannelClient: Send + Sync + Debug {
    fn is_ready(&self) -> bool;

    /// Send `body` to `recipient`
    ///
    /// # Errors
    /// If the channel did not accept the message
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ChannelError>;

    /// Subscribe to readiness events
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}

/// Development channel that logs each message instead of sending it
///
/// Always ready. Every send publishes a [`ChannelEvent::Heartbeat`].
#[derive(Debug, Clone)]
pub struct LogChannel {
    events: broadcast::Sender<ChannelEvent>,
}

impl Default for LogChannel {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { events }
    }
}

impl LogChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelClient for LogChannel {
    fn is_ready(&self) -> bool {
        true
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<(), ChannelError> {
        outgoing!(level = INFO, "To {}: {}", recipient, body);

        // Nobody listening is fine
        let _ = self.events.send(ChannelEvent::Heartbeat);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// Channel selection in the configuration file
///
/// ```ron
/// Courier (
///     channel: Log,
/// )
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ChannelConfig {
    #[default]
    Log,
}

impl ChannelConfig {
    #[must_use]
    pub fn into_client(self) -> Arc<dyn ChannelClient> {
        match self {
            Self::Log => Arc::new(LogChannel::new()),
        }
    }
}
