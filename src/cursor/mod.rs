//! Batched server-side cursors.
//!
//! This module contains the cursor reply parsing and the `BatchCursor`
//! iterator that owns a server cursor id:
//! - batch pulls via `getMore`
//! - client-side limit enforcement with final-batch truncation
//! - mandatory `killCursors` release on close, drain-at-limit, or drop

mod batch;
mod batch_cursor;

pub use batch::CursorBatch;
pub use batch_cursor::{BatchCursor, CursorConfig};

#[cfg(test)]
mod tests;
