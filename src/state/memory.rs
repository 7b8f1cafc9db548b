//! In-memory storage adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use glob::Pattern;
use tracing::debug;

use super::storage::{row_matches, QueryOptions, Row, StorageAdapter, StorageError, StoredValue};
use crate::spec::TableDef;
use crate::value::{Value, ValueMap};

#[derive(Debug, Clone)]
struct TableData {
    def: TableDef,
    rows: Vec<Row>,
    next_id: i64,
}

/// Keeps variables and table rows in process memory. Contents are lost when
/// the adapter is dropped.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: DashMap<String, StoredValue>,
    tables: DashMap<String, TableData>,
    closed: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        self.ensure_open()?;
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_open()?;
        Ok(self.values.remove(key).is_some())
    }

    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_open()?;
        Ok(self.values.contains_key(key))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_open()?;
        let pattern = Pattern::new(pattern)
            .map_err(|e| StorageError::InvalidKey(format!("invalid pattern: {}", e)))?;
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.values.clear();
        Ok(())
    }

    async fn create_table(&self, name: &str, def: &TableDef) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableData {
                def: def.clone(),
                rows: Vec::new(),
                next_id: 1,
            });
        Ok(())
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StorageError> {
        self.ensure_open()?;
        let mut data = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        if let Some(primary) = data.def.primary_key().map(str::to_string) {
            match row.get(&primary) {
                None | Some(Value::Null) => {
                    let id = data.next_id;
                    data.next_id += 1;
                    row.insert(primary, Value::Integer(id));
                }
                Some(key) => {
                    if data
                        .rows
                        .iter()
                        .any(|existing| existing.get(&primary).is_some_and(|v| v.loose_eq(key)))
                    {
                        return Err(StorageError::DuplicateKey {
                            table: table.to_string(),
                            key: key.to_string(),
                        });
                    }
                    if let Value::Integer(id) = key {
                        data.next_id = data.next_id.max(id.saturating_add(1));
                    }
                }
            }
        }
        data.rows.push(row.clone());
        debug!(table = %table, rows = data.rows.len(), "Row inserted");
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filter: &ValueMap,
        changes: &ValueMap,
    ) -> Result<u64, StorageError> {
        self.ensure_open()?;
        let mut data = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let mut updated = 0;
        for row in data.rows.iter_mut().filter(|row| row_matches(row, filter)) {
            for (column, value) in changes {
                row.insert(column.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_rows(&self, table: &str, filter: &ValueMap) -> Result<u64, StorageError> {
        self.ensure_open()?;
        let mut data = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let before = data.rows.len();
        data.rows.retain(|row| !row_matches(row, filter));
        Ok((before - data.rows.len()) as u64)
    }

    async fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>, StorageError> {
        self.ensure_open()?;
        let data = self
            .tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let mut rows: Vec<Row> = data
            .rows
            .iter()
            .filter(|row| row_matches(row, &options.filter))
            .cloned()
            .collect();
        drop(data);

        if let Some(column) = &options.order_by {
            rows.sort_by(|a, b| {
                let left = a.get(column).unwrap_or(&Value::Null);
                let right = b.get(column).unwrap_or(&Value::Null);
                left.compare(right)
            });
            if options.descending {
                rows.reverse();
            }
        }
        Ok(rows
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ColumnDef, ColumnType};
    use pretty_assertions::assert_eq;

    fn warnings_table() -> TableDef {
        let mut def = TableDef::default();
        def.columns.insert(
            "id".into(),
            ColumnDef {
                column_type: ColumnType::Integer,
                primary: true,
                default: None,
            },
        );
        def.columns.insert("user_id".into(), ColumnDef::default());
        def.columns.insert(
            "points".into(),
            ColumnDef {
                column_type: ColumnType::Number,
                ..Default::default()
            },
        );
        def
    }

    fn row(user: &str, points: i64) -> Row {
        let mut row = Row::new();
        row.insert("user_id".into(), Value::from(user));
        row.insert("points".into(), Value::Integer(points));
        row
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = InMemoryStorage::new();
        storage
            .set("guild:1:a", StoredValue::new(Value::Integer(1), None))
            .await
            .unwrap();
        storage
            .set("guild:1:b", StoredValue::new(Value::Integer(2), None))
            .await
            .unwrap();
        storage
            .set("user:9:a", StoredValue::new(Value::Integer(3), None))
            .await
            .unwrap();

        assert_eq!(
            storage.get("guild:1:a").await.unwrap().unwrap().value,
            Value::Integer(1)
        );
        assert!(storage.has("user:9:a").await.unwrap());
        assert_eq!(
            storage.keys("guild:1:*").await.unwrap(),
            vec!["guild:1:a".to_string(), "guild:1:b".to_string()]
        );
        assert!(storage.delete("guild:1:a").await.unwrap());
        assert!(!storage.delete("guild:1:a").await.unwrap());
        storage.clear().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            storage.keys("[").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_table_rows() {
        let storage = InMemoryStorage::new();
        storage.create_table("warnings", &warnings_table()).await.unwrap();

        let first = storage.insert("warnings", row("9", 1)).await.unwrap();
        assert_eq!(first.get("id"), Some(&Value::Integer(1)));
        storage.insert("warnings", row("9", 5)).await.unwrap();
        storage.insert("warnings", row("3", 2)).await.unwrap();

        let mut by_user = ValueMap::new();
        by_user.insert("user_id".into(), Value::from("9"));
        let mut options = QueryOptions::filtered(by_user.clone());
        options.order_by = Some("points".into());
        options.descending = true;
        let rows = storage.query("warnings", &options).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("points"), Some(&Value::Integer(5)));

        let mut changes = ValueMap::new();
        changes.insert("points".into(), Value::Integer(0));
        assert_eq!(storage.update("warnings", &by_user, &changes).await.unwrap(), 2);
        assert_eq!(storage.delete_rows("warnings", &by_user).await.unwrap(), 2);
        assert_eq!(
            storage
                .query("warnings", &QueryOptions::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_primary_key() {
        let storage = InMemoryStorage::new();
        storage.create_table("warnings", &warnings_table()).await.unwrap();
        let mut explicit = row("1", 1);
        explicit.insert("id".into(), Value::Integer(10));
        storage.insert("warnings", explicit.clone()).await.unwrap();
        assert!(matches!(
            storage.insert("warnings", explicit).await,
            Err(StorageError::DuplicateKey { .. })
        ));
        let generated = storage.insert("warnings", row("2", 1)).await.unwrap();
        assert_eq!(generated.get("id"), Some(&Value::Integer(11)));
    }

    #[tokio::test]
    async fn test_closed_and_missing_table() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            storage.insert("nope", Row::new()).await,
            Err(StorageError::TableNotFound(_))
        ));
        storage.close().await.unwrap();
        assert_eq!(storage.get("x").await, Err(StorageError::Closed));
    }
}
