//! Retention cleaner
//!
//! Periodically deletes `sent` and `failed` messages older than the retention
//! window. `pending` and `processing` messages are never touched. Each sweep
//! also runs stall recovery.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_common::{Signal, internal};
use courier_store::{MessageStore, Store, message::now};
use serde::Deserialize;
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{
    error::MaintenanceError,
    policy::RetryPolicy,
    processor::{recovery, window_start},
};

const SECONDS_PER_DAY: u64 = 86_400;

const fn default_retention_days() -> u64 {
    7
}

const fn default_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetentionConfig {
    /// How long terminal messages are kept (in days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// How often the cleaner runs (in seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(SECONDS_PER_DAY))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Delete terminal messages processed more than `retention` before `now`
///
/// Returns the number of messages deleted.
///
/// # Errors
/// If the store cannot be written, or `retention` is out of range
#[tracing::instrument(level = "debug", skip(store), err)]
pub async fn sweep(
    store: &dyn Store,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<usize, MaintenanceError> {
    let cutoff = window_start(now, retention)?;
    Ok(store.delete_terminal_before(cutoff).await?)
}

/// Background task running [`sweep`] and stall recovery on an interval
#[derive(Debug, Clone)]
pub struct RetentionCleaner {
    store: Arc<dyn Store>,
    config: RetentionConfig,
    policy: RetryPolicy,
    stall_timeout: Duration,
}

impl RetentionCleaner {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: RetentionConfig,
        policy: RetryPolicy,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            policy,
            stall_timeout,
        }
    }

    /// One sweep plus stall recovery; errors are logged
    pub async fn run_once(&self) {
        let now = now();

        match sweep(self.store.as_ref(), self.config.retention(), now).await {
            Ok(0) => debug!("Retention sweep found nothing to delete"),
            Ok(deleted) => info!(
                deleted,
                retention_days = self.config.retention_days,
                "Deleted expired messages"
            ),
            Err(e) => error!(error = %e, "Retention sweep failed"),
        }

        match recovery::recover_stalled(self.store.as_ref(), &self.policy, self.stall_timeout, now)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered stalled messages"),
            Err(e) => error!(error = %e, "Stall recovery failed"),
        }
    }

    /// Run until a shutdown signal is received
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            "Retention cleaner starting, sweeping every {:?}",
            self.config.sweep_interval()
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once().await,
                _ = shutdown.recv() => {
                    internal!("Retention cleaner received shutdown signal");
                    break;
                }
            }
        }
    }
}
