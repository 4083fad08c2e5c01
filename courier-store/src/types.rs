use std::{fmt, str::FromStr, sync::LazyLock};

use parking_lot::Mutex;

/// Process-wide generator so ids minted within the same millisecond still
/// sort in creation order.
static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

/// Identifier for a queued message
///
/// This is a globally unique identifier (ULID). ULIDs are lexicographically
/// sortable by creation time, so the textual form orders the same way as the
/// value itself, both in memory and in `SQLite`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Create a new message ID from a ULID
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique message ID
    ///
    /// Ids generated by one process are strictly increasing.
    #[must_use]
    pub fn generate() -> Self {
        let id = GENERATOR
            .lock()
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Get the timestamp (milliseconds since Unix epoch) encoded in this ULID
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim()).map(Self::new)
    }
}

impl serde::Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key of a notification dedup entry
///
/// A producer that must notify a subject at most once per condition records
/// `(subject_id, notification_type)` in the same write as the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DedupKey {
    pub subject_id: String,
    pub notification_type: String,
}

impl DedupKey {
    pub fn new(subject_id: impl Into<String>, notification_type: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            notification_type: notification_type.into(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject_id, self.notification_type)
    }
}
