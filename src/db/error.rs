//! Store status taxonomy and error type

use std::fmt;
use thiserror::Error;

/// Outcome of a Record Store or Ledger call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    /// Malformed command or stale/inconsistent reference
    InvalidData,
    /// Duplicate open offer or claim
    RecordExists,
    /// Store or connectivity failure
    InternalError,
    /// Slot contested or already linked
    RecordUsed,
}

impl Status {
    /// Collapse a result into its status, dropping the payload
    #[allow(dead_code)] // Used in tests
    pub fn of<T>(result: &DbResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.status,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::InvalidData => "invalid data",
            Self::RecordExists => "record exists",
            Self::InternalError => "internal error",
            Self::RecordUsed => "record used",
        };
        f.write_str(name)
    }
}

/// Non-`Ok` status with context
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct DbError {
    pub status: Status,
    pub message: String,
}

impl DbError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(Status::InvalidData, message)
    }

    pub fn record_exists(message: impl Into<String>) -> Self {
        Self::new(Status::RecordExists, message)
    }

    pub fn record_used(message: impl Into<String>) -> Self {
        Self::new(Status::RecordUsed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Status::InternalError, message)
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::internal(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_result() {
        let ok: DbResult<u32> = Ok(3);
        let used: DbResult<u32> = Err(DbError::record_used("taken"));
        assert_eq!(Status::of(&ok), Status::Ok);
        assert_eq!(Status::of(&used), Status::RecordUsed);
    }

    #[test]
    fn test_sqlite_errors_map_to_internal() {
        let err = DbError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.status, Status::InternalError);
    }
}
