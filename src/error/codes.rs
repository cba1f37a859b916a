//! Server error codes consumed by the result-streaming core.
//!
//! The numeric values are the authoritative baseline: retryability and
//! change-stream resumability are decided by these pinned lists plus the
//! error labels attached to a reply. Unknown codes are treated as resumable
//! for change streams (they are not on the deny-list) but never as
//! retryable for ordinary reads.

/// The server no longer knows the cursor id passed to `getMore`.
pub const CURSOR_NOT_FOUND: i32 = 43;

pub const HOST_UNREACHABLE: i32 = 6;
pub const HOST_NOT_FOUND: i32 = 7;
pub const NETWORK_TIMEOUT: i32 = 89;
pub const SHUTDOWN_IN_PROGRESS: i32 = 91;
pub const PRIMARY_STEPPED_DOWN: i32 = 189;
pub const SOCKET_EXCEPTION: i32 = 9001;
pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
pub const INTERRUPTED_AT_SHUTDOWN: i32 = 11600;

pub const INTERRUPTED: i32 = 11601;
pub const ILLEGAL_OPERATION: i32 = 20;
pub const CAPPED_POSITION_LOST: i32 = 136;
pub const CURSOR_KILLED: i32 = 237;
pub const CHANGE_STREAM_FATAL_ERROR: i32 = 280;
pub const CHANGE_STREAM_HISTORY_LOST: i32 = 286;

/// Label the server attaches to errors that permit one transparent retry.
pub const RETRYABLE_LABEL: &str = "RetryableWriteError";

/// Server codes that permit a single transparent re-execution of a read.
const RETRYABLE_READ_CODES: &[i32] = &[
    HOST_UNREACHABLE,
    HOST_NOT_FOUND,
    NETWORK_TIMEOUT,
    SHUTDOWN_IN_PROGRESS,
    PRIMARY_STEPPED_DOWN,
    SOCKET_EXCEPTION,
    NOT_WRITABLE_PRIMARY,
    INTERRUPTED_AT_SHUTDOWN,
];

/// Server codes that terminate a change stream instead of resuming it.
const NON_RESUMABLE_CODES: &[i32] = &[
    INTERRUPTED,
    ILLEGAL_OPERATION,
    CAPPED_POSITION_LOST,
    CURSOR_KILLED,
    CHANGE_STREAM_FATAL_ERROR,
    CHANGE_STREAM_HISTORY_LOST,
];

/// Whether a server code permits the single retryable-read re-execution.
pub fn is_retryable_read_code(code: i32) -> bool {
    RETRYABLE_READ_CODES.contains(&code)
}

/// Whether a server code lets a change stream resume. Everything off the
/// deny-list resumes; the deny-list terminates the stream.
pub fn is_resumable_code(code: i32) -> bool {
    !NON_RESUMABLE_CODES.contains(&code)
}

/// Get a human-readable error name from a server error code.
pub fn error_name(code: i32) -> Option<&'static str> {
    let name = match code {
        HOST_UNREACHABLE => "HostUnreachable",
        HOST_NOT_FOUND => "HostNotFound",
        ILLEGAL_OPERATION => "IllegalOperation",
        CURSOR_NOT_FOUND => "CursorNotFound",
        NETWORK_TIMEOUT => "NetworkTimeout",
        SHUTDOWN_IN_PROGRESS => "ShutdownInProgress",
        CAPPED_POSITION_LOST => "CappedPositionLost",
        PRIMARY_STEPPED_DOWN => "PrimarySteppedDown",
        CURSOR_KILLED => "CursorKilled",
        CHANGE_STREAM_FATAL_ERROR => "ChangeStreamFatalError",
        CHANGE_STREAM_HISTORY_LOST => "ChangeStreamHistoryLost",
        SOCKET_EXCEPTION => "SocketException",
        NOT_WRITABLE_PRIMARY => "NotWritablePrimary",
        INTERRUPTED_AT_SHUTDOWN => "InterruptedAtShutdown",
        INTERRUPTED => "Interrupted",
        _ => return None,
    };

    Some(name)
}
