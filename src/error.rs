use std::fmt;

/// Error kinds at the core's boundary (see design doc §7).
///
/// Every fallible operation in the metadata store, message log, event bus and
/// pub/sub registry returns one of these. Workers decide redelivery vs. DLQ
/// based on the variant, not on the underlying cause.
#[derive(Debug, Clone)]
pub enum CoreError {
    InvalidArgument(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl CoreError {
    /// Permanent failures are not worth redelivering — they go straight to the DLQ.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CoreError::InvalidArgument(_) | CoreError::NotFound(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidArgument(m) => write!(f, "invalid argument: {m}"),
            CoreError::NotFound(m) => write!(f, "not found: {m}"),
            CoreError::Conflict(m) => write!(f, "conflict: {m}"),
            CoreError::Unavailable(m) => write!(f, "unavailable: {m}"),
            CoreError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                CoreError::Unavailable(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound(e.to_string()),
            _ => CoreError::Internal(e.to_string()),
        }
    }
}
