//! Change-stream targets and options.

use std::time::Duration;

use bson::{doc, Bson, Document, Timestamp};

use crate::options::{Namespace, ReadConcernLevel, ReadPreference};

/// What slice of the change log a stream observes.
#[derive(Debug, Clone)]
pub enum ChangeStreamTarget {
    /// Every change in the deployment
    Cluster,

    /// Every change in one database
    Database(String),

    /// Changes to one collection
    Collection(Namespace),
}

impl ChangeStreamTarget {
    /// Database the aggregate is issued against. Cluster streams target
    /// `admin`.
    pub fn database(&self) -> &str {
        match self {
            ChangeStreamTarget::Cluster => "admin",
            ChangeStreamTarget::Database(db) => db,
            ChangeStreamTarget::Collection(ns) => &ns.database,
        }
    }

    /// The `aggregate` field value: the collection name, or `1` for
    /// database- and cluster-level streams.
    pub fn aggregate_target(&self) -> Bson {
        match self {
            ChangeStreamTarget::Collection(ns) => Bson::String(ns.collection.clone()),
            _ => Bson::Int32(1),
        }
    }

    /// Namespace the resulting cursor lives under, used for `getMore` and
    /// `killCursors`. Collectionless aggregates cursor under
    /// `$cmd.aggregate`.
    pub fn cursor_namespace(&self) -> Namespace {
        match self {
            ChangeStreamTarget::Cluster => Namespace::new("admin", "$cmd.aggregate"),
            ChangeStreamTarget::Database(db) => Namespace::new(db.clone(), "$cmd.aggregate"),
            ChangeStreamTarget::Collection(ns) => ns.clone(),
        }
    }
}

/// How much of the changed document an update event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullDocumentMode {
    /// Insert and replace events carry the document; updates do not
    Default,

    /// Update events carry the current majority-committed document
    UpdateLookup,
}

impl FullDocumentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FullDocumentMode::Default => "default",
            FullDocumentMode::UpdateLookup => "updateLookup",
        }
    }
}

/// Caller-facing change-stream configuration.
#[derive(Debug, Clone, Default)]
pub struct ChangeStreamOptions {
    pub full_document: Option<FullDocumentMode>,
    pub resume_after: Option<Document>,
    pub start_after: Option<Document>,
    pub start_at_operation_time: Option<Timestamp>,
    pub batch_size: Option<i32>,
    pub collation: Option<Document>,
    pub max_await_time: Option<Duration>,
    pub read_concern: Option<ReadConcernLevel>,
    pub read_preference: ReadPreference,
    pub retry_requested: bool,
}

impl ChangeStreamOptions {
    /// Build the `$changeStream` stage. Fields are emitted only when set;
    /// cluster targets additionally request `allChangesForCluster`.
    pub(crate) fn build_stage(&self, target: &ChangeStreamTarget) -> Document {
        let mut stage = Document::new();
        if let Some(mode) = self.full_document {
            stage.insert("fullDocument", mode.as_str());
        }
        if matches!(target, ChangeStreamTarget::Cluster) {
            stage.insert("allChangesForCluster", true);
        }
        if let Some(start_after) = &self.start_after {
            stage.insert("startAfter", start_after.clone());
        }
        if let Some(ts) = self.start_at_operation_time {
            stage.insert("startAtOperationTime", ts);
        }
        if let Some(resume_after) = &self.resume_after {
            stage.insert("resumeAfter", resume_after.clone());
        }
        doc! { "$changeStream": stage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_routing() {
        assert_eq!(ChangeStreamTarget::Cluster.database(), "admin");
        assert_eq!(
            ChangeStreamTarget::Database("app".to_string()).database(),
            "app"
        );
        let coll = ChangeStreamTarget::Collection(Namespace::new("app", "events"));
        assert_eq!(coll.database(), "app");
        assert_eq!(coll.aggregate_target(), Bson::String("events".to_string()));
        assert_eq!(ChangeStreamTarget::Cluster.aggregate_target(), Bson::Int32(1));
    }

    #[test]
    fn test_cursor_namespace_for_collectionless_targets() {
        assert_eq!(
            ChangeStreamTarget::Cluster.cursor_namespace().full_name(),
            "admin.$cmd.aggregate"
        );
        assert_eq!(
            ChangeStreamTarget::Database("app".to_string())
                .cursor_namespace()
                .full_name(),
            "app.$cmd.aggregate"
        );
    }

    #[test]
    fn test_stage_omits_unset_fields() {
        let options = ChangeStreamOptions::default();
        let target = ChangeStreamTarget::Collection(Namespace::new("app", "events"));
        let stage = options.build_stage(&target);
        assert_eq!(stage.get_document("$changeStream").unwrap(), &Document::new());
    }

    #[test]
    fn test_stage_with_options() {
        let options = ChangeStreamOptions {
            full_document: Some(FullDocumentMode::UpdateLookup),
            resume_after: Some(doc! { "_data": "01" }),
            ..Default::default()
        };
        let stage = options.build_stage(&ChangeStreamTarget::Cluster);
        let inner = stage.get_document("$changeStream").unwrap();
        assert_eq!(inner.get_str("fullDocument").unwrap(), "updateLookup");
        assert!(inner.get_bool("allChangesForCluster").unwrap());
        assert_eq!(
            inner.get_document("resumeAfter").unwrap(),
            &doc! { "_data": "01" }
        );
        assert!(!inner.contains_key("startAfter"));
    }
}
