//! Find-request builder and freezing cursor façade.
//!
//! `FindBuilder` accumulates find options through chainable mutators.
//! The first call that commits execution (`count`, `size`, `explain`, or
//! `iterate`) freezes the builder: later mutators fail with a frozen
//! error, while reads of the accumulated state remain permitted.

mod spec;

pub use spec::FindSpec;

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::ChannelSource;
use crate::cursor::{BatchCursor, CursorBatch, CursorConfig};
use crate::error::{DriverError, Result};
use crate::options::{ExplainVerbosity, Namespace, ReadConcernLevel, ReadPreference};
use crate::retry::{execute_with_retry, ReadOperation};
use crate::session::Binding;

/// Builder for a single find operation over documents decoded as `T`.
pub struct FindBuilder<T> {
    spec: FindSpec,
    binding: Binding,
    frozen: bool,
    executed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for FindBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindBuilder")
            .field("spec", &self.spec)
            .field("frozen", &self.frozen)
            .field("executed", &self.executed)
            .finish()
    }
}

impl<T: DeserializeOwned> FindBuilder<T> {
    /// Create a builder over `namespace` using a fork of `binding`.
    pub fn new(binding: &Binding, namespace: Namespace) -> Self {
        Self {
            spec: FindSpec::new(namespace),
            binding: binding.fork(),
            frozen: false,
            executed: false,
            _marker: PhantomData,
        }
    }

    /// The accumulated configuration. Readable before and after freezing.
    pub fn spec(&self) -> &FindSpec {
        &self.spec
    }

    fn check_not_frozen(&self) -> Result<()> {
        if self.frozen {
            return Err(DriverError::Frozen(
                "the find has frozen; options can no longer change".to_string(),
            ));
        }
        Ok(())
    }

    fn freeze(&mut self) {
        self.frozen = true;
    }

    // ========================================================================
    // Mutators (all fail once the builder has frozen)
    // ========================================================================

    pub fn filter(&mut self, filter: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.filter = Some(filter);
        Ok(self)
    }

    pub fn projection(&mut self, projection: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.projection = Some(projection);
        Ok(self)
    }

    /// Include-only projection over the named fields.
    pub fn select_fields(&mut self, fields: &[&str]) -> Result<&mut Self> {
        self.check_not_frozen()?;
        let mut projection = Document::new();
        for field in fields {
            projection.insert(*field, 1);
        }
        self.spec.projection = Some(projection);
        Ok(self)
    }

    pub fn sort(&mut self, sort: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.sort = Some(sort);
        Ok(self)
    }

    /// Ascending sort over the named fields.
    pub fn sort_by(&mut self, fields: &[&str]) -> Result<&mut Self> {
        self.check_not_frozen()?;
        let mut sort = Document::new();
        for field in fields {
            sort.insert(*field, 1);
        }
        self.spec.sort = Some(sort);
        Ok(self)
    }

    /// Hint by index key pattern.
    pub fn hint(&mut self, keys: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.hint = Some(Bson::Document(keys));
        Ok(self)
    }

    /// Hint by index name.
    pub fn hint_named(&mut self, name: &str) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.hint = Some(Bson::String(name.to_string()));
        Ok(self)
    }

    pub fn min(&mut self, min: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.min = Some(min);
        Ok(self)
    }

    pub fn max(&mut self, max: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.max = Some(max);
        Ok(self)
    }

    pub fn collation(&mut self, collation: Document) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.collation = Some(collation);
        Ok(self)
    }

    pub fn skip(&mut self, skip: i64) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.skip = skip;
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.limit = limit;
        Ok(self)
    }

    pub fn batch_size(&mut self, batch_size: i32) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.batch_size = batch_size;
        Ok(self)
    }

    pub fn max_time(&mut self, max_time: Duration) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.max_time = Some(max_time);
        Ok(self)
    }

    pub fn max_await_time(&mut self, max_await_time: Duration) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.max_await_time = Some(max_await_time);
        Ok(self)
    }

    pub fn single_batch(&mut self, single_batch: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.single_batch = Some(single_batch);
        Ok(self)
    }

    pub fn return_key(&mut self, return_key: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.return_key = Some(return_key);
        Ok(self)
    }

    pub fn show_record_id(&mut self, show_record_id: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.show_record_id = Some(show_record_id);
        Ok(self)
    }

    pub fn tailable(&mut self, tailable: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.tailable = tailable;
        Ok(self)
    }

    pub fn await_data(&mut self, await_data: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.await_data = await_data;
        Ok(self)
    }

    pub fn no_cursor_timeout(&mut self, no_cursor_timeout: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.no_cursor_timeout = no_cursor_timeout;
        Ok(self)
    }

    pub fn allow_partial_results(&mut self, partial_ok: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.partial_ok = partial_ok;
        Ok(self)
    }

    pub fn exhaust(&mut self, exhaust: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.exhaust = exhaust;
        Ok(self)
    }

    pub fn read_preference(&mut self, read_preference: ReadPreference) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.read_preference = read_preference;
        Ok(self)
    }

    pub fn read_concern(&mut self, read_concern: ReadConcernLevel) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.read_concern = Some(read_concern);
        Ok(self)
    }

    pub fn retry_reads(&mut self, retry_requested: bool) -> Result<&mut Self> {
        self.check_not_frozen()?;
        self.spec.retry_requested = retry_requested;
        Ok(self)
    }

    // ========================================================================
    // Committing operations (each freezes the builder)
    // ========================================================================

    /// Count matching documents, ignoring the configured skip and limit.
    pub async fn count(&mut self, cancel: &CancellationToken) -> Result<i64> {
        self.freeze();
        let op = CountOp {
            spec: self.spec.clone(),
            include_skip_limit: false,
        };
        self.run(&op, cancel).await
    }

    /// Count documents the cursor would return, honoring skip and limit.
    pub async fn size(&mut self, cancel: &CancellationToken) -> Result<i64> {
        self.freeze();
        let op = CountOp {
            spec: self.spec.clone(),
            include_skip_limit: true,
        };
        self.run(&op, cancel).await
    }

    /// Explain the find and return the raw reply document.
    pub async fn explain(
        &mut self,
        verbosity: ExplainVerbosity,
        cancel: &CancellationToken,
    ) -> Result<Document> {
        self.freeze();
        let op = ExplainOp {
            spec: self.spec.clone(),
            verbosity,
        };
        self.run(&op, cancel).await
    }

    /// Execute the find and return a cursor over its result.
    ///
    /// Freezes the builder; at most one cursor is ever produced.
    pub async fn iterate(&mut self, cancel: &CancellationToken) -> Result<BatchCursor<T>> {
        self.freeze();
        if self.executed {
            return Err(DriverError::Frozen(
                "the find has already been executed".to_string(),
            ));
        }
        self.spec.validate()?;
        self.executed = true;

        debug!(
            "executing find on '{}' (limit: {}, batchSize: {})",
            self.spec.namespace, self.spec.limit, self.spec.batch_size
        );

        let op = FindOp {
            spec: self.spec.clone(),
        };
        let (batch, source) = self.run(&op, cancel).await?;

        let cursor_type = self.spec.cursor_type();
        let max_time = if cursor_type.is_await() {
            self.spec.max_await_time
        } else {
            None
        };
        Ok(BatchCursor::new(
            batch,
            source,
            self.binding.fork(),
            CursorConfig {
                namespace: self.spec.namespace.clone(),
                limit: self.spec.limit,
                batch_size: self.spec.batch_size,
                max_time,
                cursor_type,
            },
        ))
    }

    async fn run<O: ReadOperation>(
        &self,
        op: &O,
        cancel: &CancellationToken,
    ) -> Result<O::Output> {
        execute_with_retry(
            &self.binding,
            &self.spec.read_preference,
            self.spec.retry_requested,
            op,
            cancel,
        )
        .await
    }
}

/// The find exchange: one command, one first batch, channel handed onward.
struct FindOp {
    spec: FindSpec,
}

#[async_trait]
impl ReadOperation for FindOp {
    type Output = (CursorBatch, ChannelSource);

    fn name(&self) -> &'static str {
        "find"
    }

    async fn execute(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<(CursorBatch, ChannelSource)> {
        let command = self.spec.build_command()?;
        let reply = source
            .run_command(
                binding,
                &self.spec.namespace.database,
                command,
                Some(&self.spec.read_preference),
                cancel,
            )
            .await?;
        let batch = CursorBatch::from_reply(&reply, true)?;
        Ok((batch, source.clone()))
    }
}

struct CountOp {
    spec: FindSpec,
    include_skip_limit: bool,
}

#[async_trait]
impl ReadOperation for CountOp {
    type Output = i64;

    fn name(&self) -> &'static str {
        "count"
    }

    async fn execute(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let command = self.spec.build_count_command(self.include_skip_limit);
        let reply = source
            .run_command(
                binding,
                &self.spec.namespace.database,
                command,
                Some(&self.spec.read_preference),
                cancel,
            )
            .await?;
        read_count(&reply)
    }
}

/// The `n` field arrives as whichever numeric type the server favors.
fn read_count(reply: &Document) -> Result<i64> {
    match reply.get("n") {
        Some(Bson::Int32(n)) => Ok(i64::from(*n)),
        Some(Bson::Int64(n)) => Ok(*n),
        Some(Bson::Double(n)) => Ok(*n as i64),
        _ => Err(DriverError::Protocol(
            "count reply missing numeric n".to_string(),
        )),
    }
}

struct ExplainOp {
    spec: FindSpec,
    verbosity: ExplainVerbosity,
}

#[async_trait]
impl ReadOperation for ExplainOp {
    type Output = Document;

    fn name(&self) -> &'static str {
        "explain"
    }

    async fn execute(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<Document> {
        let find = self.spec.build_command()?;
        let command = doc! {
            "explain": find,
            "verbosity": self.verbosity.as_str(),
        };
        source
            .run_command(
                binding,
                &self.spec.namespace.database,
                command,
                Some(&self.spec.read_preference),
                cancel,
            )
            .await
    }
}
