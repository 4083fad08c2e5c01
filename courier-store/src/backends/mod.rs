//! Backend storage implementations
//!
//! - `memory`: In-memory storage for testing and development
//! - `sqlite`: `SQLite`-backed durable storage for production use

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SqliteStoreBuilder};
