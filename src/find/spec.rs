//! The accumulated configuration of a find operation.

use std::time::Duration;

use bson::{Bson, Document};

use crate::error::{DriverError, Result};
use crate::options::{CursorType, Namespace, ReadConcernLevel, ReadPreference};

/// Everything a find command can carry, as accumulated by the builder.
///
/// Secondary-ok is never stored: it is derived from the read preference.
#[derive(Debug, Clone)]
pub struct FindSpec {
    pub namespace: Namespace,
    pub filter: Option<Document>,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub hint: Option<Bson>,
    pub min: Option<Document>,
    pub max: Option<Document>,
    pub collation: Option<Document>,
    pub skip: i64,
    /// `0` means unbounded; positive values are a hard client-side cap
    pub limit: i64,
    pub batch_size: i32,
    pub max_time: Option<Duration>,
    /// Per-`getMore` server-side await window, tailable-await only
    pub max_await_time: Option<Duration>,
    pub single_batch: Option<bool>,
    pub return_key: Option<bool>,
    pub show_record_id: Option<bool>,
    pub tailable: bool,
    pub await_data: bool,
    pub no_cursor_timeout: bool,
    pub partial_ok: bool,
    pub exhaust: bool,
    pub read_preference: ReadPreference,
    pub read_concern: Option<ReadConcernLevel>,
    pub retry_requested: bool,
}

impl FindSpec {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            filter: None,
            projection: None,
            sort: None,
            hint: None,
            min: None,
            max: None,
            collation: None,
            skip: 0,
            limit: 0,
            batch_size: 0,
            max_time: None,
            max_await_time: None,
            single_batch: None,
            return_key: None,
            show_record_id: None,
            tailable: false,
            await_data: false,
            no_cursor_timeout: false,
            partial_ok: false,
            exhaust: false,
            read_preference: ReadPreference::default(),
            read_concern: None,
            retry_requested: false,
        }
    }

    /// The cursor mode implied by the flag combination.
    pub fn cursor_type(&self) -> CursorType {
        if self.tailable && self.await_data {
            CursorType::TailableAwait
        } else if self.tailable {
            CursorType::Tailable
        } else {
            CursorType::NonTailable
        }
    }

    /// Check the invariants that cannot be enforced by construction.
    pub fn validate(&self) -> Result<()> {
        if self.skip < 0 {
            return Err(DriverError::InvalidConfig(format!(
                "skip must be non-negative, got {}",
                self.skip
            )));
        }
        if self.limit < 0 {
            return Err(DriverError::InvalidConfig(format!(
                "limit must be non-negative, got {}",
                self.limit
            )));
        }
        if self.batch_size < 0 {
            return Err(DriverError::InvalidConfig(format!(
                "batchSize must be non-negative, got {}",
                self.batch_size
            )));
        }
        if self.await_data && !self.tailable {
            return Err(DriverError::InvalidConfig(
                "awaitData requires a tailable cursor".to_string(),
            ));
        }
        if self.exhaust {
            return Err(DriverError::InvalidConfig(
                "exhaust cursors are not supported".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the `find` command body.
    pub fn build_command(&self) -> Result<Document> {
        self.validate()?;

        let mut command = Document::new();
        command.insert("find", self.namespace.collection.clone());
        command.insert("filter", self.filter.clone().unwrap_or_default());

        if let Some(projection) = &self.projection {
            command.insert("projection", projection.clone());
        }
        if let Some(sort) = &self.sort {
            command.insert("sort", sort.clone());
        }
        if let Some(hint) = &self.hint {
            command.insert("hint", hint.clone());
        }
        if self.skip > 0 {
            command.insert("skip", self.skip);
        }
        if self.limit > 0 {
            command.insert("limit", self.limit);
        }
        if self.batch_size > 0 {
            command.insert("batchSize", self.batch_size);
        }
        if let Some(single_batch) = self.single_batch {
            command.insert("singleBatch", single_batch);
        }
        if let Some(max_time) = self.max_time {
            command.insert("maxTimeMS", max_time.as_millis() as i64);
        }
        if let Some(min) = &self.min {
            command.insert("min", min.clone());
        }
        if let Some(max) = &self.max {
            command.insert("max", max.clone());
        }
        if let Some(return_key) = self.return_key {
            command.insert("returnKey", return_key);
        }
        if let Some(show_record_id) = self.show_record_id {
            command.insert("showRecordId", show_record_id);
        }
        if self.tailable {
            command.insert("tailable", true);
        }
        if self.await_data {
            command.insert("awaitData", true);
        }
        if self.no_cursor_timeout {
            command.insert("noCursorTimeout", true);
        }
        if self.partial_ok {
            command.insert("allowPartialResults", true);
        }
        if let Some(collation) = &self.collation {
            command.insert("collation", collation.clone());
        }
        if let Some(read_concern) = self.read_concern {
            command.insert("readConcern", read_concern.to_document());
        }

        Ok(command)
    }

    /// Build the `count` command body.
    ///
    /// # Arguments
    /// * `include_skip_limit` - `size()` counts within the configured
    ///   window; `count()` ignores it
    pub fn build_count_command(&self, include_skip_limit: bool) -> Document {
        let mut command = Document::new();
        command.insert("count", self.namespace.collection.clone());
        command.insert("query", self.filter.clone().unwrap_or_default());

        if include_skip_limit {
            if self.skip > 0 {
                command.insert("skip", self.skip);
            }
            if self.limit != 0 {
                command.insert("limit", self.limit);
            }
        }
        if let Some(hint) = &self.hint {
            command.insert("hint", hint.clone());
        }
        if let Some(collation) = &self.collation {
            command.insert("collation", collation.clone());
        }
        if let Some(max_time) = self.max_time {
            command.insert("maxTimeMS", max_time.as_millis() as i64);
        }

        command
    }
}
