//! Backend-neutral query types.
//!
//! These mirror the subset of document-database querying the listings need:
//! equality and membership filters, multi-field sorts, skip/limit paging,
//! field projection, and an aggregation pipeline that can count related
//! documents in another collection.
//!
//! Matching follows document-database semantics: an equality condition on
//! an array field matches when the array contains the value.

use std::cmp::Ordering;

use schemehub_core::Collection;
use serde_json::{Map, Value};

// ============================================================================
// Filters
// ============================================================================

/// Condition applied to a single top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals (or, for arrays, contains) the value
    Eq(Value),
    /// Field equals (or, for arrays, contains) any of the values
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(target) => field_matches(field, target),
            Condition::In(targets) => targets.iter().any(|t| field_matches(field, t)),
        }
    }
}

/// Conjunction of field conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Condition::Eq(value.into())));
        self
    }

    /// Require `field` to equal one of `values`.
    pub fn in_values<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.into(), Condition::In(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    /// Check a document against every clause.
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(doc.get(field)))
    }
}

/// Equality with array-contains semantics; a missing field only matches null.
pub(crate) fn field_matches(field: Option<&Value>, target: &Value) -> bool {
    match field {
        Some(Value::Array(items)) => {
            items.iter().any(|item| item == target) || matches!(target, Value::Array(t) if t == items)
        }
        Some(value) => value == target,
        None => target.is_null(),
    }
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Stable multi-key sort. Documents that tie keep their insertion order.
pub(crate) fn sort_documents(docs: &mut [Value], sorts: &[Sort]) {
    if sorts.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for sort in sorts {
            let ord = compare_values(a.get(&sort.field), b.get(&sort.field));
            let ord = match sort.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Cross-type ordering: missing/null < numbers < strings < objects < arrays < booleans.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// ============================================================================
// Find options
// ============================================================================

/// Options of a `find` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: Vec<Sort>,
    pub skip: u64,
    pub limit: Option<u64>,
    /// Top-level fields to keep; `None` returns whole documents.
    /// `_id` is always kept.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

pub(crate) fn project_fields(doc: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id".to_string(), id.clone());
    }
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    Value::Object(out)
}

// ============================================================================
// Aggregation pipeline
// ============================================================================

/// Output field of a `Project` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectField {
    /// Keep the field under its own name
    Include(String),
    /// Copy `from` into `to`
    Rename { from: String, to: String },
}

impl ProjectField {
    pub fn include(field: impl Into<String>) -> Self {
        Self::Include(field.into())
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Rename {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(Vec<Sort>),
    Skip(u64),
    Limit(u64),
    /// Count documents of `from` whose `foreign_field` matches this document's
    /// `local_field`, storing the count (0 when none) in `as_field`.
    LookupCount {
        from: Collection,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Reshape each document; fields not listed are dropped, including `_id`.
    Project(Vec<ProjectField>),
}

/// An ordered list of stages run against one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn matching(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn sort(self, sort: Sort) -> Self {
        self.stage(Stage::Sort(vec![sort]))
    }

    pub fn lookup_count(
        self,
        from: Collection,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        self.stage(Stage::LookupCount {
            from,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        })
    }

    pub fn project(self, fields: Vec<ProjectField>) -> Self {
        self.stage(Stage::Project(fields))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Collections read by `LookupCount` stages, besides the pipeline's own.
    pub fn foreign_collections(&self) -> Vec<Collection> {
        let mut out: Vec<Collection> = self
            .stages
            .iter()
            .filter_map(|s| match s {
                Stage::LookupCount { from, .. } => Some(*from),
                _ => None,
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

pub(crate) fn project_stage(doc: &Value, fields: &[ProjectField]) -> Value {
    let mut out = Map::new();
    for field in fields {
        match field {
            ProjectField::Include(name) => {
                if let Some(value) = doc.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
            ProjectField::Rename { from, to } => {
                if let Some(value) = doc.get(from) {
                    out.insert(to.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(out)
}
