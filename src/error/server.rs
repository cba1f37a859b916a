//! Structured error information extracted from server command replies.
//!
//! A failed command reply (`ok != 1`) carries a numeric code, an optional
//! code name, a message, and optional error labels. The extraction here
//! avoids string parsing by reading the reply's typed fields directly.

use std::fmt;

use bson::{Bson, Document};
use serde::Serialize;

use crate::error::codes;

/// A command failure reported by the server.
///
/// This is intended to be serialized to JSON and consumed by other
/// components (e.g. logging, APIs).
#[derive(Debug, Clone, Serialize)]
pub struct ServerError {
    /// Numeric server error code.
    pub code: i32,

    /// Symbolic code name, from the reply or the pinned code table.
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub code_name: Option<String>,

    /// Server-provided error message.
    pub message: String,

    /// Error labels attached to the reply (e.g. `RetryableWriteError`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl ServerError {
    /// Extract a `ServerError` from a command reply.
    ///
    /// Returns `None` when the reply reports success (`ok: 1`).
    pub fn from_reply(reply: &Document) -> Option<ServerError> {
        if reply_is_ok(reply) {
            return None;
        }

        let code = match reply.get("code") {
            Some(Bson::Int32(c)) => *c,
            Some(Bson::Int64(c)) => *c as i32,
            Some(Bson::Double(c)) => *c as i32,
            _ => 0,
        };

        let code_name = reply
            .get_str("codeName")
            .ok()
            .filter(|n| !n.is_empty())
            .map(String::from)
            .or_else(|| codes::error_name(code).map(String::from));

        let message = reply
            .get_str("errmsg")
            .unwrap_or("command failed")
            .to_string();

        let labels = reply
            .get_array("errorLabels")
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Some(ServerError {
            code,
            code_name,
            message,
            labels,
        })
    }

    /// Whether the reply carried the given error label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Convert the error to a compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whether a reply reports success. The `ok` field is a double on modern
/// servers but tolerated as any numeric type.
fn reply_is_ok(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        // A reply without an ok field is treated as success; the command
        // layer has already surfaced transport failures.
        _ => true,
    }
}

/// Format a server error as pretty JSON wrapped in an `error` field.
///
/// Intended to be used by the parent module's `Display` implementation for
/// `DriverError::Server`.
pub fn format_server_error(f: &mut fmt::Formatter<'_>, error: &ServerError) -> fmt::Result {
    let wrapper = serde_json::json!({ "error": error });

    let json_output = serde_json::to_string_pretty(&wrapper).map_err(|_| fmt::Error)?;
    write!(f, "\n{json_output}")
}
