//! The aggregation operation behind a change stream.
//!
//! Prepends the `$changeStream` stage to the caller's pipeline and runs
//! the combined aggregate. The operation is kept alive by the stream
//! cursor so a resume can re-issue it with updated resume options.

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::change_stream::options::{ChangeStreamOptions, ChangeStreamTarget};
use crate::change_stream::ResumeState;
use crate::channel::ChannelSource;
use crate::cursor::CursorBatch;
use crate::error::Result;
use crate::retry::ReadOperation;
use crate::session::Binding;

pub struct AggregateOp {
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
}

impl AggregateOp {
    /// # Arguments
    /// * `target` - Cluster, database, or collection scope
    /// * `pipeline` - Caller stages appended after `$changeStream`
    /// * `options` - Stream configuration, including resume fields
    pub fn new(
        target: ChangeStreamTarget,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Self {
        Self {
            target,
            pipeline,
            options,
        }
    }

    pub fn target(&self) -> &ChangeStreamTarget {
        &self.target
    }

    pub fn options(&self) -> &ChangeStreamOptions {
        &self.options
    }

    /// Rewrite the resume fields for the next attempt.
    ///
    /// Priority: a known post-batch resume token (kept in the field the
    /// caller originally used), then the last yielded event id as
    /// `resumeAfter`, then an operation time, else the original stage is
    /// reissued unchanged.
    pub(crate) fn apply_resume(&mut self, state: &ResumeState) {
        let options = &mut self.options;
        if let Some(token) = state.post_batch_resume_token() {
            if state.prefer_start_after() {
                options.start_after = Some(token.clone());
                options.resume_after = None;
            } else {
                options.resume_after = Some(token.clone());
                options.start_after = None;
            }
            options.start_at_operation_time = None;
        } else if let Some(id) = state.last_yielded_id() {
            options.resume_after = Some(id.clone());
            options.start_after = None;
            options.start_at_operation_time = None;
        } else if let Some(ts) = state.operation_time_for_resume() {
            options.start_at_operation_time = Some(ts);
            options.resume_after = None;
            options.start_after = None;
        }
    }

    /// Build the aggregate command body.
    pub(crate) fn build_command(&self) -> Document {
        let mut pipeline = vec![Bson::Document(self.options.build_stage(&self.target))];
        pipeline.extend(self.pipeline.iter().cloned().map(Bson::Document));

        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.batch_size {
            cursor.insert("batchSize", batch_size);
        }

        let mut command = Document::new();
        command.insert("aggregate", self.target.aggregate_target());
        command.insert("pipeline", pipeline);
        command.insert("cursor", cursor);
        if let Some(collation) = &self.options.collation {
            command.insert("collation", collation.clone());
        }
        if let Some(max_await_time) = self.options.max_await_time {
            command.insert("maxAwaitTimeMS", max_await_time.as_millis() as i64);
        }
        if let Some(read_concern) = self.options.read_concern {
            command.insert("readConcern", read_concern.to_document());
        }
        command
    }

    /// One aggregate exchange on an already selected channel.
    pub(crate) async fn run(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<(CursorBatch, ChannelSource)> {
        let reply = source
            .run_command(
                binding,
                self.target.database(),
                self.build_command(),
                Some(&self.options.read_preference),
                cancel,
            )
            .await?;
        let batch = CursorBatch::from_reply(&reply, true)?;
        Ok((batch, source.clone()))
    }

    /// Re-run the aggregate for a resume.
    ///
    /// Selects a server afresh and executes exactly once: the stream
    /// cursor already owns the failure handling, so no retry wrapper.
    pub(crate) async fn resume(
        &self,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<(CursorBatch, ChannelSource)> {
        debug!("re-running change stream aggregate on '{}'", self.target.database());
        let source = binding
            .select_server(&self.options.read_preference, cancel)
            .await?;
        self.run(&source, binding, cancel).await
    }
}

#[async_trait]
impl ReadOperation for AggregateOp {
    type Output = (CursorBatch, ChannelSource);

    fn name(&self) -> &'static str {
        "aggregate"
    }

    async fn execute(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<(CursorBatch, ChannelSource)> {
        self.run(source, binding, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Namespace;
    use bson::doc;

    fn op(options: ChangeStreamOptions) -> AggregateOp {
        AggregateOp::new(
            ChangeStreamTarget::Collection(Namespace::new("app", "events")),
            vec![doc! { "$match": { "operationType": "insert" } }],
            options,
        )
    }

    #[test]
    fn test_command_shape() {
        let command = op(ChangeStreamOptions {
            batch_size: Some(8),
            max_await_time: Some(std::time::Duration::from_millis(250)),
            ..Default::default()
        })
        .build_command();

        assert_eq!(command.get_str("aggregate").unwrap(), "events");
        let pipeline = command.get_array("pipeline").unwrap();
        assert_eq!(pipeline.len(), 2);
        let stage = pipeline[0].as_document().unwrap();
        assert!(stage.contains_key("$changeStream"));
        let user_stage = pipeline[1].as_document().unwrap();
        assert!(user_stage.contains_key("$match"));
        assert_eq!(
            command.get_document("cursor").unwrap().get_i32("batchSize").unwrap(),
            8
        );
        assert_eq!(command.get_i64("maxAwaitTimeMS").unwrap(), 250);
    }

    #[test]
    fn test_cluster_command_targets_admin() {
        let op = AggregateOp::new(ChangeStreamTarget::Cluster, vec![], Default::default());
        assert_eq!(op.target().database(), "admin");
        let command = op.build_command();
        assert_eq!(command.get_i32("aggregate").unwrap(), 1);
    }

    #[test]
    fn test_resume_prefers_post_batch_token() {
        let mut op = op(Default::default());
        let mut state = ResumeState::new(op.options());
        state.set_last_yielded_id(doc! { "ts": 2 });
        state.set_post_batch_resume_token(doc! { "_data": "99" });

        op.apply_resume(&state);
        assert_eq!(op.options().resume_after, Some(doc! { "_data": "99" }));
        assert!(op.options().start_after.is_none());
    }

    #[test]
    fn test_resume_preserves_start_after_field() {
        let mut op = op(ChangeStreamOptions {
            start_after: Some(doc! { "_data": "00" }),
            ..Default::default()
        });
        let mut state = ResumeState::new(op.options());
        state.set_post_batch_resume_token(doc! { "_data": "99" });

        op.apply_resume(&state);
        assert_eq!(op.options().start_after, Some(doc! { "_data": "99" }));
        assert!(op.options().resume_after.is_none());
    }

    #[test]
    fn test_resume_falls_back_to_last_yielded_id() {
        let mut op = op(ChangeStreamOptions {
            start_after: Some(doc! { "_data": "00" }),
            ..Default::default()
        });
        let mut state = ResumeState::new(op.options());
        state.set_last_yielded_id(doc! { "ts": 7 });

        op.apply_resume(&state);
        assert_eq!(op.options().resume_after, Some(doc! { "ts": 7 }));
        // startAfter is cleared once an event has been observed.
        assert!(op.options().start_after.is_none());
    }

    #[test]
    fn test_resume_falls_back_to_operation_time() {
        let ts = bson::Timestamp {
            time: 99,
            increment: 1,
        };
        let mut op = op(Default::default());
        let mut state = ResumeState::new(op.options());
        state.set_initial_operation_time(ts);

        op.apply_resume(&state);
        assert_eq!(op.options().start_at_operation_time, Some(ts));
        assert!(op.options().resume_after.is_none());
    }

    #[test]
    fn test_resume_without_state_reissues_unchanged() {
        let original = ChangeStreamOptions {
            resume_after: Some(doc! { "_data": "42" }),
            ..Default::default()
        };
        let mut op = op(original);
        let state = ResumeState::new(op.options());

        op.apply_resume(&state);
        assert_eq!(op.options().resume_after, Some(doc! { "_data": "42" }));
    }
}
