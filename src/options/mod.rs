//! Shared option vocabulary for read operations.
//!
//! This module defines the small value types threaded through the command
//! builders: namespaces, read preferences, read concerns, cursor modes, and
//! explain verbosity.

use std::fmt;

use bson::{doc, Document};

/// A fully qualified collection namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Create a new namespace
    ///
    /// # Arguments
    /// * `database` - Database name
    /// * `collection` - Collection name
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// The `db.coll` rendering used in cursor replies.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Which servers a read operation may be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Route to the primary only
    #[default]
    Primary,

    /// Prefer the primary, fall back to a secondary
    PrimaryPreferred,

    /// Route to a secondary only
    Secondary,

    /// Prefer a secondary, fall back to the primary
    SecondaryPreferred,

    /// Route to the lowest-latency member
    Nearest,
}

impl ReadPreference {
    /// The wire-protocol mode string.
    pub fn mode_str(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }

    /// Secondary-ok is implied by any mode other than primary; it is
    /// derived here and never stored independently.
    pub fn is_secondary_ok(&self) -> bool {
        !matches!(self, ReadPreference::Primary)
    }

    /// Render as a `$readPreference` document.
    pub fn to_document(&self) -> Document {
        doc! { "mode": self.mode_str() }
    }
}

/// Isolation level requested for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Linearizable,
    Available,
    Snapshot,
}

impl ReadConcernLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadConcernLevel::Local => "local",
            ReadConcernLevel::Majority => "majority",
            ReadConcernLevel::Linearizable => "linearizable",
            ReadConcernLevel::Available => "available",
            ReadConcernLevel::Snapshot => "snapshot",
        }
    }

    /// Render as a `readConcern` sub-document.
    pub fn to_document(&self) -> Document {
        doc! { "level": self.as_str() }
    }
}

/// How a cursor behaves at the end of the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorType {
    /// The cursor drains and closes at end-of-data
    #[default]
    NonTailable,

    /// The cursor stays open past end-of-data (capped collections)
    Tailable,

    /// Tailable, and `getMore` blocks server-side awaiting new data
    TailableAwait,
}

impl CursorType {
    pub fn is_tailable(&self) -> bool {
        !matches!(self, CursorType::NonTailable)
    }

    pub fn is_await(&self) -> bool {
        matches!(self, CursorType::TailableAwait)
    }
}

/// Verbosity of an `explain` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainVerbosity {
    /// Plan selection only
    QueryPlanner,

    /// Full execution statistics for every candidate plan
    AllPlansExecution,
}

impl ExplainVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainVerbosity::QueryPlanner => "queryPlanner",
            ExplainVerbosity::AllPlansExecution => "allPlansExecution",
        }
    }
}
