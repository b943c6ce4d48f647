use rusqlite::ErrorCode;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the durable store.
///
/// Callers tell a missing row (`NotFound`) or a rejected write (`Conflict`)
/// apart from the backend being unusable (`Unavailable`, `LockPoisoned`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("write rejected: {0}")]
    Conflict(String),

    #[error("database unavailable: {0}")]
    Unavailable(rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures that say nothing about the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::LockPoisoned)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, ref msg)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            other => Self::Unavailable(other),
        }
    }
}
