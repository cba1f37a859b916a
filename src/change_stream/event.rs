//! Typed change events.
//!
//! Change streams are generic over the decoded event type; this module
//! provides the standard event document shape for callers that do not
//! bring their own.

use bson::{Document, Timestamp};
use serde::{Deserialize, Deserializer};

/// The kind of change an event describes.
///
/// Unknown kinds decode to [`OperationType::Unknown`] so that newer
/// servers do not break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    Invalidate,
    Unknown,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Replace => "replace",
            OperationType::Delete => "delete",
            OperationType::Drop => "drop",
            OperationType::Rename => "rename",
            OperationType::DropDatabase => "dropDatabase",
            OperationType::Invalidate => "invalidate",
            OperationType::Unknown => "unknown",
        }
    }

    fn from_wire(value: &str) -> Self {
        match value {
            "insert" => OperationType::Insert,
            "update" => OperationType::Update,
            "replace" => OperationType::Replace,
            "delete" => OperationType::Delete,
            "drop" => OperationType::Drop,
            "rename" => OperationType::Rename,
            "dropDatabase" => OperationType::DropDatabase,
            "invalidate" => OperationType::Invalidate,
            _ => OperationType::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(OperationType::from_wire(&value))
    }
}

/// The namespace an event applies to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventNamespace {
    pub db: String,
    #[serde(default)]
    pub coll: Option<String>,
}

/// Field-level description of an update event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateDescription {
    #[serde(rename = "updatedFields", default)]
    pub updated_fields: Option<Document>,
    #[serde(rename = "removedFields", default)]
    pub removed_fields: Option<Vec<String>>,
}

/// The standard change event document.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStreamEvent {
    /// The event's resume token
    #[serde(rename = "_id")]
    pub id: Document,

    #[serde(rename = "operationType")]
    pub operation_type: OperationType,

    #[serde(rename = "fullDocument", default)]
    pub full_document: Option<Document>,

    #[serde(default)]
    pub ns: Option<EventNamespace>,

    #[serde(rename = "documentKey", default)]
    pub document_key: Option<Document>,

    #[serde(rename = "updateDescription", default)]
    pub update_description: Option<UpdateDescription>,

    #[serde(rename = "clusterTime", default)]
    pub cluster_time: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_decodes_insert_event() {
        let event: ChangeStreamEvent = bson::from_document(doc! {
            "_id": { "_data": "82" },
            "operationType": "insert",
            "fullDocument": { "name": "a" },
            "ns": { "db": "app", "coll": "events" },
            "documentKey": { "_id": 1 },
        })
        .unwrap();

        assert_eq!(event.operation_type, OperationType::Insert);
        assert_eq!(event.id, doc! { "_data": "82" });
        assert_eq!(event.full_document, Some(doc! { "name": "a" }));
        let ns = event.ns.unwrap();
        assert_eq!(ns.db, "app");
        assert_eq!(ns.coll.as_deref(), Some("events"));
    }

    #[test]
    fn test_decodes_update_description() {
        let event: ChangeStreamEvent = bson::from_document(doc! {
            "_id": { "_data": "83" },
            "operationType": "update",
            "documentKey": { "_id": 1 },
            "updateDescription": {
                "updatedFields": { "status": "closed" },
                "removedFields": ["tmp"],
            },
        })
        .unwrap();

        let update = event.update_description.unwrap();
        assert_eq!(update.updated_fields, Some(doc! { "status": "closed" }));
        assert_eq!(update.removed_fields, Some(vec!["tmp".to_string()]));
    }

    #[test]
    fn test_unknown_operation_type_is_tolerated() {
        let event: ChangeStreamEvent = bson::from_document(doc! {
            "_id": { "_data": "84" },
            "operationType": "shardCollection",
        })
        .unwrap();
        assert_eq!(event.operation_type, OperationType::Unknown);
        assert_eq!(event.operation_type.as_str(), "unknown");
    }
}
