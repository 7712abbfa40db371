//! Store traits for session persistence.

use crate::store::SessionRecord;

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Session id that cannot name a document.
    InvalidId(String),
    SerializationError(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidId(id) => write!(f, "invalid session id {:?}", id),
            StoreError::SerializationError(e) => write!(f, "serialization error: {}", e),
            StoreError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persists session documents keyed by session id.
pub trait SessionStore: Send + Sync {
    /// Load a session. `Ok(None)` when nothing is stored under `id`.
    fn load(&self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// Store a session, replacing any previous one.
    fn save(&self, id: &str, record: &SessionRecord) -> StoreResult<()>;

    /// Delete a session. Clearing a missing session is not an error.
    fn clear(&self, id: &str) -> StoreResult<()>;
}
