//! `SQLite`-backed durable store
//!
//! One database file holds three tables:
//! - `messages`: every outbound message, keyed by id
//! - `channel_status`: a single row (`id = 1`) with readiness and counters
//! - `notification_log`: the dedup log, keyed by `(subject_id, notification_type)`
//!
//! Timestamps are stored as integer Unix milliseconds. Each [`Transition`] is
//! one `UPDATE ... WHERE id = ? AND status = ?`, so the compare-and-swap on
//! status also holds between processes that share the file. Settling a claim
//! also matches `claimed_at`, and bumps the channel counters in the same
//! transaction.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    ChannelStatusRecord, DedupKey, Message, MessageId, MessageStatus, NewMessage, Result,
    StoreError, Transition, TransitionOutcome,
    r#trait::{DedupLog, MessageStore, StatusStore},
};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const fn default_busy_timeout_ms() -> u64 {
    5000
}

const MESSAGE_COLUMNS: &str = "id, recipient, body, status, priority, scheduled_at, created_at, \
     processed_at, claimed_at, retry_count, max_retries, error_message";

/// `SQLite` store
///
/// The connection sits behind a mutex and every call runs on the blocking
/// thread pool, so the async runtime never waits on disk I/O.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create a new `SqliteStore` builder
    #[must_use]
    pub fn builder() -> SqliteStoreBuilder {
        SqliteStoreBuilder::default()
    }

    /// Open (or create) the database at `path` with default settings
    ///
    /// # Errors
    /// If the path is rejected, or the database cannot be opened or migrated
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Open a private in-memory database, for tests
    ///
    /// # Errors
    /// If the schema cannot be created
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, or `None` for an in-memory store
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }

    /// Reject paths that traverse upwards or point into system directories
    fn validate_path(path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::Configuration(
                "database path must not be empty".to_string(),
            ));
        }

        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(StoreError::Configuration(format!(
                "database path cannot contain '..' components: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(StoreError::Configuration(format!(
                "database cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

/// Builder for [`SqliteStore`]
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreBuilder {
    #[serde(default)]
    path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    busy_timeout_ms: u64,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl SqliteStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// How long a writer waits on a lock held by another connection
    #[must_use]
    pub const fn busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Open the database, creating its directory and schema if needed
    ///
    /// # Errors
    /// If the path is rejected, or the database cannot be opened or migrated
    pub fn open(self) -> Result<SqliteStore> {
        SqliteStore::validate_path(&self.path)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrate(&conn)?;

        info!(path = %self.path.display(), "Opened message store");

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(self.path),
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current > SCHEMA_VERSION {
        return Err(StoreError::Configuration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE messages (
                id TEXT PRIMARY KEY NOT NULL,
                recipient TEXT NOT NULL CHECK (length(trim(recipient)) > 0),
                body TEXT NOT NULL CHECK (length(trim(body)) > 0),
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'processing', 'sent', 'failed')),
                priority INTEGER NOT NULL DEFAULT 0,
                scheduled_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                processed_at INTEGER,
                claimed_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
                max_retries INTEGER NOT NULL CHECK (max_retries >= 0),
                error_message TEXT,
                CHECK (retry_count <= max_retries)
            );

            CREATE INDEX idx_messages_eligible
                ON messages (status, priority DESC, created_at, id);
            CREATE INDEX idx_messages_processed
                ON messages (status, processed_at);

            CREATE TABLE channel_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                is_ready INTEGER NOT NULL DEFAULT 0,
                last_heartbeat INTEGER,
                message_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO channel_status (id) VALUES (1);

            CREATE TABLE notification_log (
                subject_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                PRIMARY KEY (subject_id, notification_type)
            );
        ",
        )?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![1, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;

        debug!(version = 1, "Applied store schema");
    }

    Ok(())
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

/// A `messages` row exactly as `SQLite` returns it
struct MessageRow {
    id: String,
    recipient: String,
    body: String,
    status: String,
    priority: i32,
    scheduled_at: i64,
    created_at: i64,
    processed_at: Option<i64>,
    claimed_at: Option<i64>,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient: row.get(1)?,
            body: row.get(2)?,
            status: row.get(3)?,
            priority: row.get(4)?,
            scheduled_at: row.get(5)?,
            created_at: row.get(6)?,
            processed_at: row.get(7)?,
            claimed_at: row.get(8)?,
            retry_count: row.get(9)?,
            max_retries: row.get(10)?,
            error_message: row.get(11)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row
                .id
                .parse()
                .map_err(|_| StoreError::InvalidId(row.id.clone()))?,
            recipient: row.recipient,
            body: row.body,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            priority: row.priority,
            scheduled_at: from_millis(row.scheduled_at)?,
            created_at: from_millis(row.created_at)?,
            processed_at: row.processed_at.map(from_millis).transpose()?,
            claimed_at: row.claimed_at.map(from_millis).transpose()?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            error_message: row.error_message,
        })
    }
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, MessageRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(Message::try_from).collect()
}

fn insert_message(conn: &Connection, record: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, recipient, body, status, priority, scheduled_at,
                               created_at, retry_count, max_retries)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        params![
            record.id.to_string(),
            record.recipient,
            record.body,
            record.status.as_str(),
            record.priority,
            to_millis(record.scheduled_at),
            to_millis(record.created_at),
            record.max_retries,
        ],
    )?;
    Ok(())
}

/// Apply `transition` to one row, returning the number of rows changed
///
/// With `claimed_at` set the row must also still carry that claim (`?4`).
fn apply_transition(
    conn: &Connection,
    id: &str,
    transition: &Transition,
    claimed_at: Option<DateTime<Utc>>,
) -> Result<usize> {
    let from = transition.from().as_str();
    let to = transition.to().as_str();
    let claim = claimed_at.map(to_millis);

    let changed = match transition {
        Transition::Claim { at } => conn.execute(
            "UPDATE messages SET status = ?3, claimed_at = ?5
             WHERE id = ?1 AND status = ?2 AND (?4 IS NULL OR claimed_at = ?4)",
            params![id, from, to, claim, to_millis(*at)],
        )?,
        Transition::Deliver { at } => conn.execute(
            "UPDATE messages SET status = ?3, processed_at = ?5, claimed_at = NULL
             WHERE id = ?1 AND status = ?2 AND (?4 IS NULL OR claimed_at = ?4)",
            params![id, from, to, claim, to_millis(*at)],
        )?,
        Transition::Reschedule {
            retry_count,
            scheduled_at,
            error,
        } => conn.execute(
            "UPDATE messages
             SET status = ?3, retry_count = ?5, scheduled_at = ?6, error_message = ?7,
                 claimed_at = NULL
             WHERE id = ?1 AND status = ?2 AND (?4 IS NULL OR claimed_at = ?4)",
            params![id, from, to, claim, retry_count, to_millis(*scheduled_at), error],
        )?,
        Transition::Fail { at, error } => conn.execute(
            "UPDATE messages
             SET status = ?3, processed_at = ?5, error_message = ?6, claimed_at = NULL
             WHERE id = ?1 AND status = ?2 AND (?4 IS NULL OR claimed_at = ?4)",
            params![id, from, to, claim, to_millis(*at), error],
        )?,
        Transition::Requeue { at } => conn.execute(
            "UPDATE messages
             SET status = ?3, retry_count = 0, scheduled_at = ?5, processed_at = NULL,
                 claimed_at = NULL
             WHERE id = ?1 AND status = ?2 AND (?4 IS NULL OR claimed_at = ?4)",
            params![id, from, to, claim, to_millis(*at)],
        )?,
    };

    Ok(changed)
}

/// Channel status column counting messages that reached `status`
const fn terminal_counter(status: MessageStatus) -> Option<&'static str> {
    match status {
        MessageStatus::Sent => Some("message_count"),
        MessageStatus::Failed => Some("error_count"),
        MessageStatus::Pending | MessageStatus::Processing => None,
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    #[tracing::instrument(skip_all)]
    async fn enqueue(&self, message: NewMessage) -> Result<MessageId> {
        let id = MessageId::generate();
        let record = Message::from_new(id.clone(), message);

        self.with_connection(move |conn| insert_message(conn, &record))
            .await?;

        Ok(id)
    }

    async fn get(&self, id: &MessageId) -> Result<Message> {
        let id = id.clone();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![id.to_string()],
                    MessageRow::read,
                )
                .optional()?;

            row.map_or(Err(StoreError::NotFound(id)), Message::try_from)
        })
        .await
    }

    async fn list_pending(&self) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = 'pending'
                     ORDER BY priority DESC, created_at ASC, id ASC"
                ),
                [],
            )
        })
        .await
    }

    async fn list_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |conn| {
            query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE status = 'pending' AND scheduled_at <= ?1
                     ORDER BY priority DESC, created_at ASC, id ASC
                     LIMIT ?2"
                ),
                params![to_millis(now), limit],
            )
        })
        .await
    }

    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<Message>> {
        self.with_connection(move |conn| {
            query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = ?1
                     ORDER BY created_at ASC, id ASC"
                ),
                params![status.as_str()],
            )
        })
        .await
    }

    async fn count_by_status(&self, status: MessageStatus) -> Result<usize> {
        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            usize::try_from(count).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .await
    }

    async fn list_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_connection(move |conn| {
            query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE status = 'processing' AND claimed_at < ?1
                     ORDER BY claimed_at ASC"
                ),
                params![to_millis(claimed_before)],
            )
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(transition = transition.name()))]
    async fn transition(
        &self,
        id: &MessageId,
        transition: &Transition,
    ) -> Result<TransitionOutcome> {
        let id = id.to_string();
        let transition = transition.clone();

        self.with_connection(move |conn| {
            Ok(match apply_transition(conn, &id, &transition, None)? {
                0 => TransitionOutcome::NotApplicable,
                _ => TransitionOutcome::Applied,
            })
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(transition = transition.name()))]
    async fn settle(
        &self,
        id: &MessageId,
        claimed_at: DateTime<Utc>,
        transition: &Transition,
    ) -> Result<TransitionOutcome> {
        transition.ensure_settles_claim()?;

        let id = id.to_string();
        let transition = transition.clone();

        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction()?;

            if apply_transition(&tx, &id, &transition, Some(claimed_at))? == 0 {
                return Ok(TransitionOutcome::NotApplicable);
            }

            if let Some(counter) = terminal_counter(transition.to()) {
                tx.execute(
                    &format!("UPDATE channel_status SET {counter} = {counter} + 1 WHERE id = 1"),
                    [],
                )?;
            }

            tx.commit()?;
            Ok(TransitionOutcome::Applied)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_connection(move |conn| {
            Ok(conn.execute(
                "DELETE FROM messages
                 WHERE status IN ('sent', 'failed')
                   AND processed_at IS NOT NULL
                   AND processed_at < ?1",
                params![to_millis(cutoff)],
            )?)
        })
        .await
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn load_status(&self) -> Result<ChannelStatusRecord> {
        self.with_connection(|conn| {
            let (is_ready, last_heartbeat, message_count, error_count): (
                bool,
                Option<i64>,
                i64,
                i64,
            ) = conn.query_row(
                "SELECT is_ready, last_heartbeat, message_count, error_count
                 FROM channel_status WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            Ok(ChannelStatusRecord {
                is_ready,
                last_heartbeat: last_heartbeat.map(from_millis).transpose()?,
                message_count: u64::try_from(message_count)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                error_count: u64::try_from(error_count)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            })
        })
        .await
    }

    async fn set_ready(&self, ready: bool, at: DateTime<Utc>) -> Result<()> {
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE channel_status SET is_ready = ?1, last_heartbeat = ?2 WHERE id = 1",
                params![ready, to_millis(at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn heartbeat(&self, at: DateTime<Utc>) -> Result<()> {
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE channel_status SET last_heartbeat = ?1 WHERE id = 1",
                params![to_millis(at)],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DedupLog for SqliteStore {
    async fn was_already_sent(&self, key: &DedupKey) -> Result<bool> {
        let key = key.clone();
        self.with_connection(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM notification_log
                     WHERE subject_id = ?1 AND notification_type = ?2",
                    params![key.subject_id, key.notification_type],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
        .await
    }

    async fn record_sent(&self, key: &DedupKey, at: DateTime<Utc>) -> Result<bool> {
        let key = key.clone();
        self.with_connection(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO notification_log (subject_id, notification_type, sent_at)
                 VALUES (?1, ?2, ?3)",
                params![key.subject_id, key.notification_type, to_millis(at)],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    #[tracing::instrument(skip(self, message), fields(key = %key))]
    async fn enqueue_once(
        &self,
        key: &DedupKey,
        at: DateTime<Utc>,
        message: NewMessage,
    ) -> Result<Option<MessageId>> {
        let key = key.clone();
        let id = MessageId::generate();
        let record = Message::from_new(id.clone(), message);

        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction()?;

            let recorded = tx.execute(
                "INSERT OR IGNORE INTO notification_log (subject_id, notification_type, sent_at)
                 VALUES (?1, ?2, ?3)",
                params![key.subject_id, key.notification_type, to_millis(at)],
            )?;
            if recorded == 0 {
                return Ok(None);
            }

            insert_message(&tx, &record)?;
            tx.commit()?;

            Ok(Some(id))
        })
        .await
    }

    async fn forget(&self, key: &DedupKey) -> Result<bool> {
        let key = key.clone();
        self.with_connection(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM notification_log WHERE subject_id = ?1 AND notification_type = ?2",
                params![key.subject_id, key.notification_type],
            )?;
            Ok(deleted == 1)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::EnqueueOptions;

    #[test]
    fn test_path_validation() {
        for rejected in ["", "../courier.db", "/var/../etc/courier.db", "/etc/courier.db"] {
            assert!(
                SqliteStore::builder().path(rejected).open().is_err(),
                "{rejected} should be rejected"
            );
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("courier.db");

        drop(SqliteStore::open(&path).expect("first open"));
        let store = SqliteStore::open(&path).expect("second open");

        let version: i32 = store
            .conn
            .lock()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("schema version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("courier.db");

        let id = {
            let store = SqliteStore::open(&path).expect("open");
            let new = NewMessage::new("+15550100", "hello", EnqueueOptions::default(), 3)
                .expect("valid message");
            store.enqueue(new).await.expect("enqueue")
        };

        let store = SqliteStore::open(&path).expect("reopen");
        let message = store.get(&id).await.expect("message persisted");
        assert_eq!(message.body, "hello");
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.created_at.timestamp_millis(), {
            i64::try_from(id.timestamp_ms()).expect("timestamp fits")
        });
    }

    #[tokio::test]
    async fn test_failed_enqueue_once_leaves_no_dedup_entry() {
        let store = SqliteStore::open_in_memory().expect("open");
        let key = DedupKey::new("order-42", "shipped");

        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_messages BEFORE INSERT ON messages
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("trigger");

        let new = NewMessage::new("+15550100", "shipped", EnqueueOptions::default(), 3)
            .expect("valid message");
        assert!(
            store
                .enqueue_once(&key, crate::message::now(), new)
                .await
                .is_err()
        );
        assert!(!store.was_already_sent(&key).await.expect("dedup"));
    }

    #[tokio::test]
    async fn test_corrupt_status_is_reported() {
        let store = SqliteStore::open_in_memory().expect("open");
        let new = NewMessage::new("+15550100", "hello", EnqueueOptions::default(), 3)
            .expect("valid message");
        let id = store.enqueue(new).await.expect("enqueue");

        // Bypass the CHECK constraint to simulate a foreign writer
        {
            let conn = store.conn.lock();
            conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
                .expect("pragma");
            conn.execute(
                "UPDATE messages SET status = 'queued' WHERE id = ?1",
                params![id.to_string()],
            )
            .expect("update");
        }

        assert!(matches!(
            store.get(&id).await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
