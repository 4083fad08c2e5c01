use std::sync::{Arc, LazyLock};

use courier_common::{Signal, internal, logging};
use courier_delivery::{
    ChannelClient, ChannelConfig, DeliveryConfig, NotificationService, RetentionCleaner,
    RetentionConfig,
};
use courier_store::{Store, StoreConfig};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};

/// Top-level configuration, read from `courier.config.ron`
///
/// ```ron
/// Courier (
///     store: Sqlite(path: "/var/lib/courier/courier.db"),
///     channel: Log,
///     delivery: (tick_interval_ms: 5000, batch_size: 10),
///     retention: (retention_days: 7),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forcing shutdown");

    Ok(())
}

impl Courier {
    /// Open the configured store and channel and wire up the service
    ///
    /// # Errors
    /// If the delivery settings are invalid, or the store cannot be opened
    pub fn service(&self) -> anyhow::Result<NotificationService> {
        let (service, _) = self.open()?;
        Ok(service)
    }

    fn open(&self) -> anyhow::Result<(NotificationService, Arc<dyn ChannelClient>)> {
        self.delivery.validate()?;

        let store = self.store.clone().into_store()?;
        let channel = self.channel.into_client();
        let service = NotificationService::new(store, Arc::clone(&channel), self.delivery.clone());

        Ok((service, channel))
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the store cannot be opened, or
    /// the signal handlers cannot be installed.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let ret = tokio::select! {
            r = self.serve(SHUTDOWN_BROADCAST.subscribe()) => r,
            r = shutdown() => r,
        };

        internal!("Shutting down...");

        ret
    }

    /// Deliver until `shutdown` receives [`Signal::Shutdown`]
    ///
    /// Starts the delivery worker, the channel status observer and the
    /// retention cleaner. On shutdown the worker finishes its in-flight tick
    /// before this returns.
    ///
    /// # Errors
    /// If the store cannot be opened, or a background task panics
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let (service, channel) = self.open()?;
        let store: Arc<dyn Store> = Arc::clone(service.store());

        let observer = tokio::spawn({
            let tracker = service.status_tracker().clone();
            let shutdown = shutdown.resubscribe();
            async move { tracker.observe(channel, shutdown).await }
        });

        let cleaner = RetentionCleaner::new(
            store,
            self.retention,
            self.delivery.retry,
            self.delivery.stall_timeout(),
        );
        let sweeper = tokio::spawn({
            let shutdown = shutdown.resubscribe();
            async move { cleaner.serve(shutdown).await }
        });

        service.start_processing(self.delivery.tick_interval());
        internal!(level = INFO, "Courier running");

        loop {
            match shutdown.recv().await {
                Ok(Signal::Shutdown) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => {}
            }
        }

        service.stop_processing_and_wait().await;
        observer.await?;
        sweeper.await?;

        internal!(level = INFO, "Courier stopped");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use courier_delivery::Backoff;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let courier: Courier = ron::from_str("Courier()").expect("valid config");

        assert!(matches!(courier.store, StoreConfig::Sqlite(_)));
        assert_eq!(courier.channel, ChannelConfig::Log);
        assert_eq!(courier.delivery.tick_interval(), Duration::from_secs(5));
        assert_eq!(courier.retention, RetentionConfig::default());
    }

    #[test]
    fn test_full_config() {
        let courier: Courier = ron::from_str(
            r#"Courier(
                store: Memory,
                channel: Log,
                delivery: (
                    tick_interval_ms: 1000,
                    batch_size: 25,
                    retry: (
                        default_max_retries: 5,
                        backoff: Exponential(base_delay_secs: 30, max_delay_secs: 3600),
                    ),
                ),
                retention: (retention_days: 30),
            )"#,
        )
        .expect("valid config");

        assert!(matches!(courier.store, StoreConfig::Memory));
        assert_eq!(courier.delivery.batch_size, 25);
        assert_eq!(courier.delivery.retry.default_max_retries, 5);
        assert_eq!(
            courier.delivery.retry.backoff,
            Backoff::Exponential {
                base_delay_secs: 30,
                max_delay_secs: 3600
            }
        );
        assert_eq!(courier.retention.retention_days, 30);
    }
}
