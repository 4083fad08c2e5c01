//! Reliable outbound delivery for queued messages
//!
//! This crate provides:
//! - A retry policy with bounded, non-decreasing backoff
//! - A single-flight delivery worker that drains the store on a fixed tick
//! - Channel status tracking and the channel client adapter trait
//! - Retention cleanup and recovery of stalled deliveries
//! - [`NotificationService`], the producer and operator facade

pub mod channel;
mod error;
pub mod policy;
pub mod processor;
mod service;
pub mod status;

pub use channel::{ChannelClient, ChannelConfig, ChannelEvent, LogChannel};
pub use error::{ChannelError, ConfigError, DeliveryError, MaintenanceError, ServiceError};
pub use policy::{AttemptOutcome, Backoff, Decision, RetryPolicy};
pub use processor::{
    DeliveryConfig, DeliveryWorker, TickReport,
    cleanup::{RetentionCleaner, RetentionConfig, sweep},
    recovery::{ABANDONED, recover_stalled},
};
pub use service::{FailedMessage, NotificationService};
pub use status::{ChannelStatus, StatusTracker};
