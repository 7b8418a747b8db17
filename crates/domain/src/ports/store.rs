use serde_json::{Map, Value};
use thiserror::Error;

use super::BoxFuture;

/// A stored row or document.
pub type Row = Map<String, Value>;

/// Equality filters. A slice of filters combines with AND.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    /// Logical OR of equality matches.
    AnyOf(Vec<(String, String)>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn any_of<C, V>(pairs: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<String>,
    {
        Filter::AnyOf(
            pairs
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq { column, value } => column_equals(row, column, value),
            Filter::AnyOf(pairs) => pairs
                .iter()
                .any(|(column, value)| column_equals(row, column, value)),
        }
    }
}

fn column_equals(row: &Row, column: &str, expected: &str) -> bool {
    match row.get(column) {
        Some(Value::String(actual)) => actual == expected,
        Some(Value::Number(actual)) => actual.to_string() == expected,
        Some(Value::Bool(actual)) => actual.to_string() == expected,
        _ => false,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Operation(String),
    #[error("store uniqueness conflict: {0}")]
    Conflict(String),
}

pub trait RecordStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the first row matching every filter. Zero matches is `Ok(None)`.
    fn find_one<'a>(
        &'a self,
        table: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, Result<Option<Row>, StoreError>>;

    fn insert<'a>(&'a self, table: &'a str, row: Row) -> BoxFuture<'a, Result<Row, StoreError>>;
}
