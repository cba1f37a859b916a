//! Error types for the result-streaming core.
//!
//! This module defines a streamlined error hierarchy covering the command
//! exchange, cursor lifecycle, and change-stream resume machinery, together
//! with the classification predicates that drive retries and resumes.

use std::{fmt, io};

use crate::error::codes;
use crate::error::server::{format_server_error, ServerError};

/// Crate-wide `Result` type using [`DriverError`] as the error.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Top-level error type for driver operations.
#[derive(Debug)]
pub enum DriverError {
    /// A command failed server-side (formatted as structured JSON).
    Server(ServerError),

    /// A `getMore` referenced a cursor the server no longer knows.
    CursorNotFound { cursor_id: i64, address: String },

    /// Transport-level failure on the connection.
    Io(io::Error),

    /// The connection pool backing the selected server was cleared.
    PoolCleared(String),

    /// The caller's cancellation token fired before or during the operation.
    Cancelled,

    /// A mutator was invoked on a builder that has already frozen.
    Frozen(String),

    /// The accumulated configuration cannot be turned into an operation.
    InvalidConfig(String),

    /// An operation was invoked on a closed cursor or terminated stream.
    Disposed(String),

    /// The best-effort `killCursors` did not confirm the kill.
    KillFailed { cursor_id: i64 },

    /// The server reply did not have the expected shape.
    Protocol(String),
}

impl DriverError {
    /// Whether one transparent re-execution of a read is permitted.
    ///
    /// Transport failures and pool clears always qualify; server errors
    /// qualify by code or by carrying the retryable label.
    pub fn is_retryable_read(&self) -> bool {
        match self {
            DriverError::Io(_) | DriverError::PoolCleared(_) => true,
            DriverError::Server(e) => {
                codes::is_retryable_read_code(e.code) || e.has_label(codes::RETRYABLE_LABEL)
            }
            _ => false,
        }
    }

    /// Whether a change stream may transparently rebuild its cursor after
    /// this error. Superset of [`is_retryable_read`](Self::is_retryable_read):
    /// `CursorNotFound` resumes, and every server code off the deny-list
    /// resumes.
    pub fn is_resumable(&self) -> bool {
        match self {
            DriverError::Io(_) | DriverError::PoolCleared(_) => true,
            DriverError::CursorNotFound { .. } => true,
            DriverError::Server(e) => codes::is_resumable_code(e.code),
            _ => false,
        }
    }
}

// ============================================================================
// Display implementations
// ============================================================================

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Server(e) => format_server_error(f, e),
            DriverError::CursorNotFound { cursor_id, address } => {
                write!(f, "cursor {} not found on server {}", cursor_id, address)
            }
            DriverError::Io(e) => write!(f, "IoError: {}", e),
            DriverError::PoolCleared(msg) => write!(f, "connection pool cleared: {}", msg),
            DriverError::Cancelled => write!(f, "operation cancelled"),
            DriverError::Frozen(msg) => write!(f, "FrozenError: {}", msg),
            DriverError::InvalidConfig(msg) => write!(f, "InvalidConfig: {}", msg),
            DriverError::Disposed(msg) => write!(f, "{}", msg),
            DriverError::KillFailed { cursor_id } => {
                write!(f, "killCursors did not confirm kill of cursor {}", cursor_id)
            }
            DriverError::Protocol(msg) => write!(f, "ProtocolError: {}", msg),
        }
    }
}

// ============================================================================
// Error trait implementations
// ============================================================================

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions to DriverError
// ============================================================================

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::Server(err)
    }
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        DriverError::Io(err)
    }
}

impl From<bson::ser::Error> for DriverError {
    fn from(err: bson::ser::Error) -> Self {
        DriverError::Protocol(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for DriverError {
    fn from(err: bson::de::Error) -> Self {
        DriverError::Protocol(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: i32, labels: &[&str]) -> DriverError {
        DriverError::Server(ServerError {
            code,
            code_name: codes::error_name(code).map(String::from),
            message: "test".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        })
    }

    #[test]
    fn test_network_errors_are_retryable_and_resumable() {
        let err = DriverError::Io(io::Error::new(io::ErrorKind::TimedOut, "socket timeout"));
        assert!(err.is_retryable_read());
        assert!(err.is_resumable());

        let pool = DriverError::PoolCleared("topology changed".to_string());
        assert!(pool.is_retryable_read());
        assert!(pool.is_resumable());
    }

    #[test]
    fn test_not_writable_primary_is_retryable() {
        assert!(server_error(codes::NOT_WRITABLE_PRIMARY, &[]).is_retryable_read());
    }

    #[test]
    fn test_retryable_label_on_unknown_code() {
        assert!(!server_error(8000, &[]).is_retryable_read());
        assert!(server_error(8000, &[codes::RETRYABLE_LABEL]).is_retryable_read());
    }

    #[test]
    fn test_cursor_not_found_resumes_but_does_not_retry() {
        let err = DriverError::CursorNotFound {
            cursor_id: 42,
            address: "localhost:27017".to_string(),
        };
        assert!(!err.is_retryable_read());
        assert!(err.is_resumable());
    }

    #[test]
    fn test_deny_list_terminates_stream() {
        assert!(!server_error(codes::CHANGE_STREAM_HISTORY_LOST, &[]).is_resumable());
        assert!(!server_error(codes::CURSOR_KILLED, &[]).is_resumable());
        assert!(server_error(codes::CURSOR_NOT_FOUND, &[]).is_resumable());
    }

    #[test]
    fn test_caller_bugs_neither_retry_nor_resume() {
        let frozen = DriverError::Frozen("already executing".to_string());
        assert!(!frozen.is_retryable_read());
        assert!(!frozen.is_resumable());
        assert!(!DriverError::Cancelled.is_resumable());
    }
}
