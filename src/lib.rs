//! MongoDB Driver Result-Streaming Core
//!
//! This library implements the result-streaming core of a MongoDB driver:
//! the machinery that turns a server-side query into a locally iterable
//! sequence of documents, including the resumable change-stream variant.
//!
//! # Modules
//!
//! - `change_stream`: Resumable change-stream cursors over `$changeStream` aggregates
//! - `channel`: Command exchange contract with the wire layer
//! - `cursor`: Batched server-side cursors (`getMore`/`killCursors` lifecycle)
//! - `error`: Error types, server error codes, and retry/resume classification
//! - `find`: Find-request builder with freeze-on-execute semantics
//! - `options`: Shared option vocabulary (namespaces, read preferences, cursor modes)
//! - `retry`: Retryable execution of idempotent read operations
//! - `session`: Session state and forked binding handles
//!
//! # Example
//!
//! ```no_run
//! use bson::{doc, Document};
//! use mongodrv::change_stream::{watch, ChangeStreamOptions, ChangeStreamTarget};
//! use mongodrv::options::Namespace;
//! use mongodrv::session::Binding;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn tail_events(binding: &Binding) -> mongodrv::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let mut stream = watch::<Document>(
//!         binding,
//!         ChangeStreamTarget::Collection(Namespace::new("app", "events")),
//!         vec![doc! { "$match": { "operationType": "insert" } }],
//!         ChangeStreamOptions::default(),
//!         &cancel,
//!     )
//!     .await?;
//!
//!     loop {
//!         let event = stream.next(&cancel).await?;
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod change_stream;
pub mod channel;
pub mod cursor;
pub mod error;
pub mod find;
pub mod options;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod test_util;

// Re-export commonly used types
pub use change_stream::{watch, ChangeStreamCursor, ChangeStreamEvent};
pub use channel::{Channel, ChannelSource, ServerInfo};
pub use cursor::{BatchCursor, CursorBatch};
pub use error::{DriverError, Result, ServerError};
pub use find::{FindBuilder, FindSpec};
pub use options::{CursorType, Namespace, ReadPreference};
pub use session::{Binding, ServerSelector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
