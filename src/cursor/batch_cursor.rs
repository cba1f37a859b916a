//! The batched server-side cursor.
//!
//! A `BatchCursor` owns one server cursor id. It hands out the batch
//! delivered with the initial command, pulls further batches with
//! `getMore`, enforces the client-side limit, and releases the server
//! cursor exactly once when it is drained, closed, or dropped.

use std::time::Duration;

use bson::{doc, Bson, Document};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ChannelSource;
use crate::cursor::batch::CursorBatch;
use crate::error::{codes, DriverError, Result};
use crate::options::{CursorType, Namespace};
use crate::session::Binding;

/// Upper bound on the best-effort `killCursors` exchange, independent of
/// the caller's cancellation token.
pub(crate) const KILL_CURSORS_DEADLINE: Duration = Duration::from_secs(10);

/// Fixed parameters of one cursor.
#[derive(Debug, Clone)]
pub struct CursorConfig {
    pub namespace: Namespace,

    /// Client-side cap on returned documents; `0` means unbounded
    pub limit: i64,

    /// Per-batch size hint forwarded to the server; `0` omits the hint
    pub batch_size: i32,

    /// Attached to each `getMore` as `maxTimeMS` for tailable-await cursors
    pub max_time: Option<Duration>,

    pub cursor_type: CursorType,
}

/// An iterator over batches of `T` backed by a server cursor.
///
/// Not safe for concurrent use; drive it from a single task. The first
/// `move_next` yields the batch delivered at construction, even when that
/// batch is empty.
pub struct BatchCursor<T> {
    config: CursorConfig,
    cursor_id: i64,
    source: Option<ChannelSource>,
    binding: Option<Binding>,
    first_batch: Option<Vec<Document>>,
    current: Vec<T>,
    started: bool,
    returned_count: i64,
    closed: bool,
    was_first_batch_empty: bool,
    post_batch_resume_token: Option<Document>,
}

impl<T> std::fmt::Debug for BatchCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCursor")
            .field("config", &self.config)
            .field("cursor_id", &self.cursor_id)
            .field("started", &self.started)
            .field("returned_count", &self.returned_count)
            .field("closed", &self.closed)
            .field("was_first_batch_empty", &self.was_first_batch_empty)
            .finish()
    }
}

impl<T: DeserializeOwned> BatchCursor<T> {
    /// Wrap the first reply of a cursor-producing command.
    ///
    /// The cursor takes over the channel it was created on for its
    /// `getMore` traffic and a forked binding handle for session state.
    pub(crate) fn new(
        batch: CursorBatch,
        source: ChannelSource,
        binding: Binding,
        config: CursorConfig,
    ) -> Self {
        let was_first_batch_empty = batch.documents.is_empty();
        // The channel is only needed while the server holds cursor state.
        let source = (batch.cursor_id != 0).then_some(source);
        Self {
            config,
            cursor_id: batch.cursor_id,
            source,
            binding: Some(binding),
            first_batch: Some(batch.documents),
            current: Vec::new(),
            started: false,
            returned_count: 0,
            closed: false,
            was_first_batch_empty,
            post_batch_resume_token: batch.post_batch_resume_token,
        }
    }

    /// Advance to the next batch.
    ///
    /// Returns `false` once the server cursor is exhausted or the
    /// client-side limit has been reached. A new call invalidates the
    /// batch previously exposed through [`current`](Self::current).
    pub async fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.closed {
            return Err(DriverError::Disposed(
                "cursor has been closed".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        if !self.started {
            self.started = true;
            let docs = self.first_batch.take().unwrap_or_default();
            self.deliver(docs)?;
            return Ok(true);
        }

        if self.limit_reached() {
            // The server cursor may still be live; release it now.
            self.kill_server_cursor().await;
            return Ok(false);
        }

        if self.cursor_id == 0 {
            self.source = None;
            return Ok(false);
        }

        let reply = self.get_more(cancel).await?;
        let batch = CursorBatch::from_reply(&reply, false)?;
        self.cursor_id = batch.cursor_id;
        if batch.post_batch_resume_token.is_some() {
            self.post_batch_resume_token = batch.post_batch_resume_token;
        }
        if self.cursor_id == 0 {
            self.source = None;
        }
        self.deliver(batch.documents)?;
        Ok(true)
    }

    /// The batch most recently produced by [`move_next`](Self::move_next).
    pub fn current(&self) -> &[T] {
        &self.current
    }

    /// Resume position covering everything delivered so far, when known.
    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    /// Whether the batch delivered at construction contained no documents.
    pub fn was_first_batch_empty(&self) -> bool {
        self.was_first_batch_empty
    }

    /// Release the server cursor and the forked binding.
    ///
    /// Idempotent, and never fails: the `killCursors` exchange runs on its
    /// own 10-second deadline and every failure on that path is swallowed.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.kill_server_cursor().await;
        self.binding = None;
        self.current = Vec::new();
    }

    pub(crate) fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    fn limit_reached(&self) -> bool {
        self.config.limit > 0 && self.returned_count >= self.config.limit
    }

    /// Truncate to the remaining limit, count, decode, and expose a batch.
    fn deliver(&mut self, mut docs: Vec<Document>) -> Result<()> {
        if self.config.limit > 0 {
            let remaining = (self.config.limit - self.returned_count).max(0) as usize;
            if docs.len() > remaining {
                debug!(
                    "truncating batch of {} to {} remaining documents",
                    docs.len(),
                    remaining
                );
                docs.truncate(remaining);
            }
        }
        self.returned_count += docs.len() as i64;

        let mut typed = Vec::with_capacity(docs.len());
        for doc in docs {
            typed.push(bson::from_document(doc)?);
        }
        self.current = typed;
        Ok(())
    }

    /// The `batchSize` to request from the next `getMore`, if any.
    fn calc_next_return(&self) -> Option<i32> {
        let batch_size = self.config.batch_size;
        if self.config.limit == 0 {
            return (batch_size > 0).then_some(batch_size);
        }
        let remaining = self.config.limit - self.returned_count;
        if batch_size > 0 && i64::from(batch_size) <= remaining {
            Some(batch_size)
        } else {
            Some(remaining as i32)
        }
    }

    async fn get_more(&self, cancel: &CancellationToken) -> Result<Document> {
        let (source, binding) = match (&self.source, &self.binding) {
            (Some(source), Some(binding)) => (source, binding),
            _ => {
                return Err(DriverError::Disposed(
                    "cursor has released its channel".to_string(),
                ))
            }
        };

        let mut command = doc! {
            "getMore": self.cursor_id,
            "collection": self.config.namespace.collection.clone(),
        };
        if let Some(batch_size) = self.calc_next_return() {
            command.insert("batchSize", batch_size);
        }
        if self.config.cursor_type.is_await() {
            if let Some(max_time) = self.config.max_time {
                command.insert("maxTimeMS", max_time.as_millis() as i64);
            }
        }

        match source
            .run_command(binding, &self.config.namespace.database, command, None, cancel)
            .await
        {
            Err(DriverError::Server(e)) if e.code == codes::CURSOR_NOT_FOUND => {
                Err(DriverError::CursorNotFound {
                    cursor_id: self.cursor_id,
                    address: source.server().address.clone(),
                })
            }
            other => other,
        }
    }

    /// Best-effort release of the server-side cursor. At most one
    /// `killCursors` is ever issued per cursor id.
    async fn kill_server_cursor(&mut self) {
        if self.cursor_id == 0 {
            self.source = None;
            return;
        }
        let cursor_id = self.cursor_id;
        self.cursor_id = 0;

        let source = self.source.take();
        let binding = self.binding.clone();
        let (Some(source), Some(binding)) = (source, binding) else {
            return;
        };

        let kill = kill_cursor(&source, &binding, &self.config.namespace, cursor_id);
        match tokio::time::timeout(KILL_CURSORS_DEADLINE, kill).await {
            Ok(Ok(())) => debug!("killed server cursor {}", cursor_id),
            Ok(Err(e)) => warn!("ignoring killCursors failure for cursor {}: {}", cursor_id, e),
            Err(_) => warn!("killCursors for cursor {} timed out", cursor_id),
        }
    }
}

impl<T> Drop for BatchCursor<T> {
    fn drop(&mut self) {
        if self.closed || self.cursor_id == 0 {
            return;
        }
        let (Some(source), Some(binding)) = (self.source.take(), self.binding.take()) else {
            return;
        };
        let namespace = self.config.namespace.clone();
        let cursor_id = self.cursor_id;

        // Dropping a live cursor without close() still must not leak the
        // server cursor; fire the kill from a detached task when a runtime
        // is available.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let kill = kill_cursor(&source, &binding, &namespace, cursor_id);
                if tokio::time::timeout(KILL_CURSORS_DEADLINE, kill)
                    .await
                    .is_err()
                {
                    warn!("killCursors for dropped cursor {} timed out", cursor_id);
                }
            });
        } else {
            warn!(
                "cursor {} dropped outside a runtime; server cursor will expire on its own",
                cursor_id
            );
        }
    }
}

/// Issue `killCursors` and validate the reply.
///
/// Runs on a fresh token so caller cancellation cannot abandon the
/// release.
async fn kill_cursor(
    source: &ChannelSource,
    binding: &Binding,
    namespace: &Namespace,
    cursor_id: i64,
) -> Result<()> {
    let command = doc! {
        "killCursors": namespace.collection.clone(),
        "cursors": vec![cursor_id],
    };
    let cancel = CancellationToken::new();
    let reply = source
        .run_command(binding, &namespace.database, command, None, &cancel)
        .await?;

    if id_list_contains(&reply, "cursorsNotFound", cursor_id) {
        return Err(DriverError::CursorNotFound {
            cursor_id,
            address: source.server().address.clone(),
        });
    }
    if !id_list_contains(&reply, "cursorsKilled", cursor_id) {
        return Err(DriverError::KillFailed { cursor_id });
    }
    Ok(())
}

fn id_list_contains(reply: &Document, key: &str, cursor_id: i64) -> bool {
    reply
        .get_array(key)
        .map(|arr| {
            arr.iter().any(|v| match v {
                Bson::Int64(id) => *id == cursor_id,
                Bson::Int32(id) => i64::from(*id) == cursor_id,
                _ => false,
            })
        })
        .unwrap_or(false)
}
