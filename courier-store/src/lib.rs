//! Durable storage for outbound messages
//!
//! This crate owns the persisted state of the delivery subsystem:
//! - Message records and their lifecycle status
//! - The singleton channel status record
//! - The notification dedup log used by idempotent producers
//!
//! Every status change goes through a conditional [`Transition`], which is the
//! only concurrency-safety mechanism between competing workers.

pub mod backends;
pub mod config;
pub mod error;
pub mod message;
pub mod select;
pub mod r#trait;
pub mod transition;
pub mod types;

pub use backends::{MemoryStore, SqliteStore, SqliteStoreBuilder};
pub use config::StoreConfig;
pub use error::{Result, StoreError, ValidationError};
pub use message::{ChannelStatusRecord, EnqueueOptions, Message, MessageStatus, NewMessage};
pub use select::{eligibility_order, is_eligible, select_eligible};
pub use r#trait::{DedupLog, MessageStore, StatusStore, Store};
pub use transition::{Transition, TransitionOutcome};
pub use types::{DedupKey, MessageId};
