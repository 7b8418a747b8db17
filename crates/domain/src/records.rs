use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::ports::BoxFuture;
use crate::ports::store::{Filter, RecordStore, Row, StoreError};

/// Table-keyed row store with optional unique column sets, used by tests and
/// the `memory` data backend.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<HashMap<String, Vec<Row>>>>,
    unique: Arc<HashMap<String, Vec<Vec<String>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects inserts into `table` that repeat an existing row's values for
    /// every column in `columns`. Rows missing any of the columns are exempt.
    pub fn with_unique<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique = (*self.unique).clone();
        unique
            .entry(table.to_string())
            .or_default()
            .push(columns.into_iter().map(Into::into).collect());
        self.unique = Arc::new(unique);
        self
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Inserts without uniqueness checks or id assignment.
    pub async fn seed(&self, table: &str, row: Row) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    fn violates(existing: &[Row], columns: &[String], row: &Row) -> bool {
        let key = columns
            .iter()
            .map(|column| row.get(column).filter(|value| !value.is_null()))
            .collect::<Option<Vec<&Value>>>();
        let Some(key) = key else {
            return false;
        };
        existing.iter().any(|other| {
            columns
                .iter()
                .zip(key.iter())
                .all(|(column, value)| other.get(column) == Some(*value))
        })
    }
}

impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn find_one<'a>(
        &'a self,
        table: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, Result<Option<Row>, StoreError>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let found = tables.get(table).and_then(|rows| {
                rows.iter()
                    .find(|row| filters.iter().all(|filter| filter.matches(row)))
                    .cloned()
            });
            Ok(found)
        })
    }

    fn insert<'a>(&'a self, table: &'a str, mut row: Row) -> BoxFuture<'a, Result<Row, StoreError>> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table.to_string()).or_default();
            if let Some(column_sets) = self.unique.get(table) {
                for columns in column_sets {
                    if Self::violates(rows, columns, &row) {
                        return Err(StoreError::Conflict(format!(
                            "duplicate key on {table}({})",
                            columns.join(", ")
                        )));
                    }
                }
            }
            row.entry("id")
                .or_insert_with(|| Value::String(crate::util::uuid_v7_without_dashes()));
            rows.push(row.clone());
            Ok(row)
        })
    }
}
