//! Resumable change-stream cursors.
//!
//! A `ChangeStreamCursor` presents an infinite, transparently resumable
//! sequence of change events. It owns an inner [`BatchCursor`] over raw
//! event documents, tracks resume tokens as events flow through, and on a
//! resumable failure rebuilds the server cursor from the best known
//! position before continuing.

mod aggregate;
mod event;
mod options;

pub use aggregate::AggregateOp;
pub use event::{ChangeStreamEvent, EventNamespace, OperationType, UpdateDescription};
pub use options::{ChangeStreamOptions, ChangeStreamTarget, FullDocumentMode};

use std::collections::VecDeque;
use std::marker::PhantomData;

use bson::{Document, Timestamp};
use futures::Stream;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::ChannelSource;
use crate::cursor::{BatchCursor, CursorBatch, CursorConfig};
use crate::error::{DriverError, Result};
use crate::options::CursorType;
use crate::retry::execute_with_retry;
use crate::session::Binding;

/// Open a change stream over `target`.
///
/// The caller's pipeline stages run after the `$changeStream` stage.
/// Events decode to `T`; [`ChangeStreamEvent`] is the standard shape.
pub async fn watch<T: DeserializeOwned>(
    binding: &Binding,
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    cancel: &CancellationToken,
) -> Result<ChangeStreamCursor<T>> {
    let op = AggregateOp::new(target, pipeline, options);
    ChangeStreamCursor::open(binding, op, cancel).await
}

/// The logical position of a stream in the change log.
///
/// Only ever advanced, never regressed: resuming from a stale position
/// would replay events the caller has already observed.
#[derive(Debug, Clone)]
pub(crate) struct ResumeState {
    start_at_operation_time: Option<Timestamp>,
    initial_operation_time: Option<Timestamp>,
    post_batch_resume_token: Option<Document>,
    last_yielded_id: Option<Document>,
    prefer_start_after: bool,
    caller_supplied_position: bool,
}

impl ResumeState {
    pub(crate) fn new(options: &ChangeStreamOptions) -> Self {
        Self {
            start_at_operation_time: options.start_at_operation_time,
            initial_operation_time: None,
            post_batch_resume_token: None,
            last_yielded_id: None,
            prefer_start_after: options.start_after.is_some(),
            caller_supplied_position: options.resume_after.is_some()
                || options.start_after.is_some()
                || options.start_at_operation_time.is_some(),
        }
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub(crate) fn last_yielded_id(&self) -> Option<&Document> {
        self.last_yielded_id.as_ref()
    }

    pub(crate) fn prefer_start_after(&self) -> bool {
        self.prefer_start_after
    }

    /// The operation time a resume may fall back to: the caller's, or the
    /// one captured at creation.
    pub(crate) fn operation_time_for_resume(&self) -> Option<Timestamp> {
        self.start_at_operation_time.or(self.initial_operation_time)
    }

    pub(crate) fn set_post_batch_resume_token(&mut self, token: Document) {
        self.post_batch_resume_token = Some(token);
    }

    pub(crate) fn set_last_yielded_id(&mut self, id: Document) {
        self.last_yielded_id = Some(id);
    }

    pub(crate) fn set_initial_operation_time(&mut self, ts: Timestamp) {
        self.initial_operation_time = Some(ts);
    }

    /// Whether the capture conditions for the implicit start position can
    /// still apply on a batch with the given shape.
    fn may_capture_operation_time(&self, batch: &CursorBatch) -> bool {
        self.initial_operation_time.is_none()
            && !self.caller_supplied_position
            && batch.documents.is_empty()
            && batch.post_batch_resume_token.is_none()
    }
}

/// A transparent, resumable iterator of decoded change events.
///
/// Not safe for concurrent use; drive it from a single task.
pub struct ChangeStreamCursor<T> {
    op: AggregateOp,
    inner: BatchCursor<Document>,
    binding: Binding,
    pending: VecDeque<Document>,
    resume: ResumeState,
    max_wire_version: i32,
    terminated: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChangeStreamCursor<T> {
    /// Run the initial aggregate and wrap its cursor.
    pub(crate) async fn open(
        binding: &Binding,
        op: AggregateOp,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let binding = binding.fork();
        let (batch, source) = execute_with_retry(
            &binding,
            &op.options().read_preference,
            op.options().retry_requested,
            &op,
            cancel,
        )
        .await?;

        let max_wire_version = source.server().max_wire_version;
        let mut resume = ResumeState::new(op.options());
        // A token on a non-empty batch only becomes the stream position
        // once every document in the batch has been yielded; ingest takes
        // care of that as the batch flows through.
        if batch.documents.is_empty() {
            if let Some(token) = &batch.post_batch_resume_token {
                resume.set_post_batch_resume_token(token.clone());
            }
        }
        // With no explicit start position and nothing in the first batch
        // to anchor on, the session's operation time is the stream's
        // logical start.
        if source.server().supports_start_at_operation_time()
            && resume.may_capture_operation_time(&batch)
        {
            if let Some(ts) = binding.operation_time() {
                resume.set_initial_operation_time(ts);
            }
        }

        let inner = make_inner(&op, batch, source, &binding);
        Ok(Self {
            op,
            inner,
            binding,
            pending: VecDeque::new(),
            resume,
            max_wire_version,
            terminated: false,
            _marker: PhantomData,
        })
    }

    /// Wait for and return the next change event.
    ///
    /// Suspends across empty await rounds until an event arrives, the
    /// token fires, or the stream terminates.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        loop {
            if cancel.is_cancelled() {
                return Err(DriverError::Cancelled);
            }
            if let Some(event) = self.next_if_any(cancel).await? {
                return Ok(event);
            }
        }
    }

    /// One advance round: the next buffered event, or `None` when the
    /// round produced nothing new.
    pub async fn next_if_any(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        if self.terminated {
            return Err(DriverError::Disposed(
                "the change stream has terminated".to_string(),
            ));
        }
        if let Some(event) = self.take_pending()? {
            return Ok(Some(event));
        }

        if self.advance_inner(cancel).await? {
            self.ingest_batch();
        }
        self.take_pending()
    }

    /// The token to resume from if this stream were rebuilt now.
    pub fn resume_token(&self) -> Option<&Document> {
        if self.pending.is_empty() {
            self.resume
                .post_batch_resume_token()
                .or_else(|| self.resume.last_yielded_id())
        } else {
            // Events are still buffered; the batch token lies ahead of
            // the caller's position.
            self.resume.last_yielded_id()
        }
    }

    /// Highest wire version of the server behind the current cursor.
    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    /// Release the server cursor and terminate the stream.
    pub async fn close(&mut self) {
        self.terminated = true;
        self.pending.clear();
        self.inner.close().await;
    }

    /// Adapt the cursor into a `futures::Stream` of events.
    ///
    /// The stream ends after the first terminal error.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold((self, cancel, false), |(mut cursor, cancel, done)| async move {
            if done {
                return None;
            }
            match cursor.next(&cancel).await {
                Ok(event) => Some((Ok(event), (cursor, cancel, false))),
                Err(e) => Some((Err(e), (cursor, cancel, true))),
            }
        })
    }

    /// Advance the inner cursor, resuming at most once on this failure.
    async fn advance_inner(&mut self, cancel: &CancellationToken) -> Result<bool> {
        match self.inner.move_next(cancel).await {
            Ok(true) => Ok(true),
            // An await cursor is not expected to drain; reestablish it.
            Ok(false) => self.resume_and_advance(cancel).await,
            Err(e) if e.is_resumable() && !cancel.is_cancelled() => {
                debug!("resuming change stream after: {}", e);
                self.resume_and_advance(cancel).await
            }
            Err(e) => Err(self.terminal(e)),
        }
    }

    async fn resume_and_advance(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if let Err(e) = self.resume(cancel).await {
            return Err(self.terminal(e));
        }
        match self.inner.move_next(cancel).await {
            Ok(moved) => Ok(moved),
            Err(e) => Err(self.terminal(e)),
        }
    }

    /// Rebuild the server cursor from the current resume position.
    async fn resume(&mut self, cancel: &CancellationToken) -> Result<()> {
        // The old server cursor must be gone before its replacement
        // starts issuing commands.
        self.inner.close().await;

        self.op.apply_resume(&self.resume);
        let (batch, source) = self.op.resume(&self.binding, cancel).await?;
        self.max_wire_version = source.server().max_wire_version;

        if source.server().supports_start_at_operation_time()
            && self.resume.may_capture_operation_time(&batch)
        {
            if let Some(ts) = self.binding.operation_time() {
                self.resume.set_initial_operation_time(ts);
            }
        }
        if batch.documents.is_empty() {
            if let Some(token) = &batch.post_batch_resume_token {
                self.resume.set_post_batch_resume_token(token.clone());
            }
        }

        self.inner = make_inner(&self.op, batch, source, &self.binding);
        Ok(())
    }

    /// Pop the next buffered event, recording its id as the new position.
    fn take_pending(&mut self) -> Result<Option<T>> {
        let Some(doc) = self.pending.pop_front() else {
            return Ok(None);
        };
        let id = match doc.get_document("_id") {
            Ok(id) => id.clone(),
            Err(_) => {
                return Err(self.terminal(DriverError::Protocol(
                    "change event is missing its _id resume token".to_string(),
                )))
            }
        };
        let event = bson::from_document(doc)?;
        self.resume.set_last_yielded_id(id);
        Ok(Some(event))
    }

    fn ingest_batch(&mut self) {
        self.pending.extend(self.inner.current().iter().cloned());
        if let Some(token) = self.inner.post_batch_resume_token() {
            self.resume.set_post_batch_resume_token(token.clone());
        }
    }

    /// Latch the stream closed on a propagated error. Cancellation is the
    /// one failure the caller may recover from.
    fn terminal(&mut self, e: DriverError) -> DriverError {
        if !matches!(e, DriverError::Cancelled) {
            self.terminated = true;
        }
        e
    }
}

fn make_inner(
    op: &AggregateOp,
    batch: CursorBatch,
    source: ChannelSource,
    binding: &Binding,
) -> BatchCursor<Document> {
    BatchCursor::new(
        batch,
        source,
        binding.fork(),
        CursorConfig {
            namespace: op.target().cursor_namespace(),
            limit: 0,
            batch_size: op.options().batch_size.unwrap_or(0),
            max_time: op.options().max_await_time,
            cursor_type: CursorType::TailableAwait,
        },
    )
}
