//! Change notification types.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::collection::Collection;

/// Kind of change observed in a watched collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Document was inserted
    Insert,
    /// Document fields were updated
    Update,
    /// Document was replaced wholesale
    Replace,
    /// Document was deleted
    Delete,
    /// Changes may have been missed (lagging subscriber, reconnect)
    Resync,
}

impl ChangeKind {
    /// Returns the string representation of the change kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Replace => "replace",
            ChangeKind::Delete => "delete",
            ChangeKind::Resync => "resync",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signal that something changed in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub collection: Collection,
    pub kind: ChangeKind,
    /// Id of the changed document, when the source reports one
    pub document_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeNotification {
    pub fn new(collection: Collection, kind: ChangeKind, document_id: Option<String>) -> Self {
        Self {
            collection,
            kind,
            document_id,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn inserted(collection: Collection, document_id: impl Into<String>) -> Self {
        Self::new(collection, ChangeKind::Insert, Some(document_id.into()))
    }

    pub fn updated(collection: Collection, document_id: impl Into<String>) -> Self {
        Self::new(collection, ChangeKind::Update, Some(document_id.into()))
    }

    pub fn deleted(collection: Collection, document_id: impl Into<String>) -> Self {
        Self::new(collection, ChangeKind::Delete, Some(document_id.into()))
    }

    /// A notification that carries no document: "assume everything changed".
    pub fn resync(collection: Collection) -> Self {
        Self::new(collection, ChangeKind::Resync, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let n = ChangeNotification::inserted(Collection::States, "s1");
        assert_eq!(n.kind, ChangeKind::Insert);
        assert_eq!(n.document_id.as_deref(), Some("s1"));

        let n = ChangeNotification::resync(Collection::Schemes);
        assert_eq!(n.kind, ChangeKind::Resync);
        assert!(n.document_id.is_none());
    }

    #[test]
    fn test_json_shape() {
        let n = ChangeNotification::deleted(Collection::Categories, "c9");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["collection"], "categories");
        assert_eq!(json["kind"], "delete");
        assert_eq!(json["document_id"], "c9");

        let back: ChangeNotification = serde_json::from_value(json).unwrap();
        assert_eq!(back, n);
    }
}
