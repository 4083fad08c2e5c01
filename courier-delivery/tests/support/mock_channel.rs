//! Scripted channel client for delivery tests
//!
//! Can:
//! - Toggle readiness, publishing `Ready`/`Disconnected` events
//! - Return a scripted sequence of send results (then succeed)
//! - Delay every send, to exercise timeouts and overlapping ticks
//! - Record every send and the peak number of concurrent sends
#![allow(dead_code)] // Not every test uses every knob

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_delivery::{ChannelClient, ChannelError, ChannelEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// One send the channel saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub recipient: String,
    pub body: String,
}

#[derive(Debug)]
pub struct MockChannel {
    ready: AtomicBool,
    script: Mutex<VecDeque<Result<(), ChannelError>>>,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<Sent>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    events: broadcast::Sender<ChannelEvent>,
}

impl MockChannel {
    pub fn builder() -> MockChannelBuilder {
        MockChannelBuilder::default()
    }

    /// A ready channel that accepts everything
    pub fn ready() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        let _ = self.events.send(if ready {
            ChannelEvent::Ready
        } else {
            ChannelEvent::Disconnected
        });
    }

    pub fn heartbeat(&self) {
        let _ = self.events.send(ChannelEvent::Heartbeat);
    }

    /// Queue results for the next sends
    pub fn push_results(&self, results: impl IntoIterator<Item = Result<(), ChannelError>>) {
        self.script.lock().extend(results);
    }

    /// Make every one of the next `count` sends fail with a transport error
    pub fn fail_next(&self, count: usize) {
        self.push_results(
            (0..count).map(|_| Err(ChannelError::Transport("connection reset".to_string()))),
        );
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Sends attempted so far, including failed ones
    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelClient for MockChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<(), ChannelError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        self.sent.lock().push(Sent {
            recipient: recipient.to_string(),
            body: body.to_string(),
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.is_ready() {
            self.script.lock().pop_front().unwrap_or(Ok(()))
        } else {
            Err(ChannelError::NotReady)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct MockChannelBuilder {
    not_ready: bool,
    script: Vec<Result<(), ChannelError>>,
    delay: Option<Duration>,
}

impl MockChannelBuilder {
    pub const fn not_ready(mut self) -> Self {
        self.not_ready = true;
        self
    }

    pub fn with_result(mut self, result: Result<(), ChannelError>) -> Self {
        self.script.push(result);
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<MockChannel> {
        let (events, _) = broadcast::channel(64);

        Arc::new(MockChannel {
            ready: AtomicBool::new(!self.not_ready),
            script: Mutex::new(self.script.into()),
            delay: Mutex::new(self.delay),
            sent: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            events,
        })
    }
}
