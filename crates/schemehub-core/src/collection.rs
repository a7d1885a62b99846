//! Collections of the portal database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A collection in the source database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    States,
    Categories,
    Schemes,
    Discussions,
    Replies,
}

impl Collection {
    /// Every collection, in a stable order.
    pub const ALL: [Collection; 6] = [
        Collection::Users,
        Collection::States,
        Collection::Categories,
        Collection::Schemes,
        Collection::Discussions,
        Collection::Replies,
    ];

    /// Returns the collection name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::States => "states",
            Collection::Categories => "categories",
            Collection::Schemes => "schemes",
            Collection::Discussions => "discussions",
            Collection::Replies => "replies",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::unknown_collection(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for c in Collection::ALL {
            assert_eq!(c.as_str().parse::<Collection>().unwrap(), c);
        }
        assert_eq!("Schemes".parse::<Collection>().unwrap(), Collection::Schemes);
    }

    #[test]
    fn test_unknown_collection() {
        let err = "widgets".parse::<Collection>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownCollection(name) if name == "widgets"));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Collection::Discussions).unwrap();
        assert_eq!(json, "\"discussions\"");
    }
}
