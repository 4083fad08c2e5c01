use std::sync::Arc;

use serde::Deserialize;

use crate::{MemoryStore, Result, SqliteStoreBuilder, r#trait::Store};

/// Configuration for the message store
///
/// Selects the store implementation at runtime from the configuration file.
///
/// # Examples
///
/// `SQLite` store in RON config:
/// ```ron
/// Courier (
///     store: Sqlite(
///         path: "/var/lib/courier/courier.db",
///         busy_timeout_ms: 5000,
///     ),
/// )
/// ```
///
/// Memory store for development:
/// ```ron
/// Courier (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// In-memory store, lost on restart
    Memory,
    /// `SQLite` database file (production)
    Sqlite(SqliteStoreBuilder),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteStoreBuilder::default().path("/var/lib/courier/courier.db"))
    }
}

impl StoreConfig {
    /// Open the configured store
    ///
    /// # Errors
    /// If the `SQLite` database cannot be opened
    pub fn into_store(self) -> Result<Arc<dyn Store>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::Sqlite(builder) => Arc::new(builder.open()?),
        })
    }
}
