//! Parsing of the standard cursor reply shape.

use bson::{Bson, Document};

use crate::error::{DriverError, Result};

/// One server reply's worth of cursor state.
///
/// `cursor_id = 0` means the server holds no more data for this cursor.
#[derive(Debug, Clone, Default)]
pub struct CursorBatch {
    /// Server-issued cursor handle, `0` when the cursor is exhausted
    pub cursor_id: i64,

    /// Documents in server order
    pub documents: Vec<Document>,

    /// Resume position covering the whole batch, when the server sent one
    pub post_batch_resume_token: Option<Document>,
}

impl CursorBatch {
    /// Parse a `find`/`aggregate`/`getMore` reply.
    ///
    /// # Arguments
    /// * `reply` - The full reply document
    /// * `first` - Whether to read `firstBatch` (initial command) or `nextBatch`
    pub fn from_reply(reply: &Document, first: bool) -> Result<CursorBatch> {
        let cursor = reply
            .get_document("cursor")
            .map_err(|_| DriverError::Protocol("reply missing cursor document".to_string()))?;

        let cursor_id = cursor
            .get_i64("id")
            .map_err(|_| DriverError::Protocol("cursor reply missing int64 id".to_string()))?;

        let key = if first { "firstBatch" } else { "nextBatch" };
        let batch = cursor
            .get_array(key)
            .map_err(|_| DriverError::Protocol(format!("cursor reply missing {}", key)))?;

        let mut documents = Vec::with_capacity(batch.len());
        for entry in batch {
            match entry {
                Bson::Document(doc) => documents.push(doc.clone()),
                _ => {
                    return Err(DriverError::Protocol(format!(
                        "non-document entry in {}",
                        key
                    )))
                }
            }
        }

        let post_batch_resume_token = cursor.get_document("postBatchResumeToken").ok().cloned();

        Ok(CursorBatch {
            cursor_id,
            documents,
            post_batch_resume_token,
        })
    }
}
