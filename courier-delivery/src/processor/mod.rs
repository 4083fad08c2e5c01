//! Delivery worker orchestration
//!
//! The worker drains the queue on a fixed tick. Each tick is single-flight:
//! an atomic flag makes any overlapping tick (a second loop, or a manual
//! [`DeliveryWorker::tick`] while the loop is mid-batch) return immediately
//! with [`TickReport::skipped`] set.

pub mod cleanup;
pub mod process;
pub mod recovery;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use courier_common::{Signal, internal};
use courier_store::{Store, message::now};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelClient,
    error::{ConfigError, MaintenanceError},
    policy::RetryPolicy,
};

const fn default_tick_interval_ms() -> u64 {
    5000
}

const fn default_batch_size() -> usize {
    10
}

const fn default_send_timeout_secs() -> u64 {
    30
}

const fn default_stall_timeout_secs() -> u64 {
    600 // 10 minutes
}

/// Delivery worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// How often the worker ticks (in milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum number of messages attempted per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on one send (in seconds); a timeout is a failed attempt
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// How long a message may stay `processing` before it is considered
    /// abandoned (in seconds)
    ///
    /// Must exceed `send_timeout_secs`; see [`DeliveryConfig::validate`].
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            send_timeout_secs: default_send_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    #[must_use]
    pub const fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Check settings that only make sense together
    ///
    /// # Errors
    /// If the stall timeout does not exceed the send timeout, or the batch
    /// size is zero
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.stall_timeout_secs <= self.send_timeout_secs {
            return Err(ConfigError::StallTimeoutTooShort {
                stall: self.stall_timeout_secs,
                send: self.send_timeout_secs,
            });
        }

        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }

        Ok(())
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was in progress; nothing was done
    pub skipped: bool,
    /// The channel was ready when the tick started
    pub channel_ready: bool,
    pub selected: usize,
    pub sent: usize,
    /// Failed attempts that were rescheduled
    pub retried: usize,
    /// Failed attempts that exhausted the retry budget
    pub failed: usize,
    /// Messages another worker claimed first
    pub lost_claims: usize,
    /// Store errors; the affected messages are left for stall recovery
    pub errors: usize,
}

impl TickReport {
    const SKIPPED: Self = Self {
        skipped: true,
        channel_ready: false,
        selected: 0,
        sent: 0,
        retried: 0,
        failed: 0,
        lost_claims: 0,
        errors: 0,
    };

    /// Messages that left `processing` during this tick
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.sent + self.retried + self.failed
    }
}

/// Resets the tick-in-progress flag however the tick ends
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct RunningLoop {
    stop: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct WorkerInner {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) channel: Arc<dyn ChannelClient>,
    pub(crate) config: DeliveryConfig,
    ticking: AtomicBool,
    running: Mutex<Option<RunningLoop>>,
}

/// Periodic, single-flight delivery worker
///
/// Cloning yields another handle to the same worker.
#[derive(Debug, Clone)]
pub struct DeliveryWorker {
    inner: Arc<WorkerInner>,
}

impl DeliveryWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn ChannelClient>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                store,
                channel,
                config,
                ticking: AtomicBool::new(false),
                running: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Whether the periodic loop is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start ticking every `tick_interval`
    ///
    /// Stalled messages are recovered once before the first tick. Returns
    /// `false`, and changes nothing, if the loop is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, tick_interval: Duration) -> bool {
        let mut running = self.inner.running.lock();

        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            debug!("Delivery worker already running");
            return false;
        }

        let period = tick_interval.max(Duration::from_millis(1));
        let (stop, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Self::serve(Arc::clone(&self.inner), period, stop_rx));

        *running = Some(RunningLoop { stop, handle });
        drop(running);

        internal!(level = INFO, "Delivery worker started, ticking every {:?}", period);
        true
    }

    /// Stop ticking; a tick already in progress runs to completion
    ///
    /// Returns `false` if the loop was not running.
    pub fn stop(&self) -> bool {
        self.take_running().is_some()
    }

    /// Stop ticking and wait for the in-flight tick, if any, to finish
    pub async fn stop_and_wait(&self) {
        if let Some(handle) = self.take_running()
            && let Err(e) = handle.await
        {
            error!(error = %e, "Delivery worker loop ended abnormally");
        }
    }

    fn take_running(&self) -> Option<JoinHandle<()>> {
        let running = self.inner.running.lock().take()?;

        // The loop may already have exited on its own
        let _ = running.stop.send(Signal::Shutdown);
        internal!(level = INFO, "Delivery worker stopping");

        Some(running.handle)
    }

    /// Run one tick now
    pub async fn tick(&self) -> TickReport {
        self.tick_at(now()).await
    }

    /// Run one tick as though the current time were `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        self.inner.tick_at(now).await
    }

    /// Recover messages stuck in `processing` longer than the configured
    /// stall timeout
    ///
    /// # Errors
    /// If the store cannot be read or written
    pub async fn recover_stalled(&self) -> Result<usize, MaintenanceError> {
        recovery::recover_stalled(
            self.inner.store.as_ref(),
            &self.inner.config.retry,
            self.inner.config.stall_timeout(),
            now(),
        )
        .await
    }

    async fn serve(inner: Arc<WorkerInner>, period: Duration, mut stop: broadcast::Receiver<Signal>) {
        match recovery::recover_stalled(
            inner.store.as_ref(),
            &inner.config.retry,
            inner.config.stall_timeout(),
            now(),
        )
        .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered stalled messages"),
            Err(e) => error!(error = %e, "Stall recovery failed"),
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = stop.recv() => {
                    internal!("Delivery worker received stop signal");
                    break;
                }
                _ = interval.tick() => {
                    let report = inner.tick_at(now()).await;
                    log_report(&report);
                }
            }
        }

        internal!(level = INFO, "Delivery worker stopped");
    }
}

impl WorkerInner {
    async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            debug!("Previous tick still in progress, skipping");
            return TickReport::SKIPPED;
        };

        process::process_batch(self, now).await
    }
}

fn log_report(report: &TickReport) {
    if report.skipped {
        return;
    }

    if !report.channel_ready {
        debug!("Channel not ready, delivery deferred");
    } else if report.selected == 0 {
        debug!("No messages eligible for delivery");
    } else if report.errors > 0 {
        warn!(
            selected = report.selected,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            lost_claims = report.lost_claims,
            errors = report.errors,
            "Delivery tick completed with store errors"
        );
    } else {
        info!(
            selected = report.selected,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            lost_claims = report.lost_claims,
            "Delivery tick complete"
        );
    }
}

/// The instant `window` before `now`
pub(crate) fn window_start(
    now: DateTime<Utc>,
    window: Duration,
) -> Result<DateTime<Utc>, MaintenanceError> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or(MaintenanceError::InvalidWindow(window))
}
