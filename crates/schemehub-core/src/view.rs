//! Precomputed listing results.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

/// A denormalized listing result set, cached across tiers.
///
/// A view is produced whole and replaced whole; nothing mutates the rows of
/// a view after it has been built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateView {
    /// Cache key of the query that produced this view
    pub key: String,
    /// Result rows, in listing order
    pub rows: Vec<Value>,
    /// Total matching documents, for paginated listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

impl AggregateView {
    pub fn new(key: impl Into<String>, rows: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            rows,
            total: None,
            computed_at: OffsetDateTime::now_utc(),
        }
    }

    /// Build a view from typed rows.
    pub fn from_rows<T: Serialize>(key: impl Into<String>, rows: &[T]) -> Result<Self> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(key, rows))
    }

    /// A view with no rows: the listing legitimately has nothing to show.
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, Vec::new())
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Deserialize every row into `T`.
    pub fn rows_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| {
                T::deserialize(row).map_err(|e| CoreError::invalid_row(e.to_string()))
            })
            .collect()
    }
}
