//! Storage adapter trait for persistent state.
//!
//! The state manager never persists anything itself; it delegates key/value
//! storage and table rows to a `StorageAdapter`. Engines (SQL databases,
//! key-value stores) live outside this crate. [`InMemoryStorage`] is the
//! bundled reference implementation.
//!
//! [`InMemoryStorage`]: super::memory::InMemoryStorage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::TableDef;
use crate::value::{Value, ValueMap};

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// The requested table has not been created.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A row with the same primary key already exists.
    #[error("Duplicate primary key `{key}` in table {table}")]
    DuplicateKey { table: String, key: String },

    /// The key or pattern is not acceptable to the backend.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The adapter has been closed.
    #[error("Storage closed")]
    Closed,

    /// Generic backend failure.
    #[error("Storage error: {0}")]
    Backend(String),
}

/// A persisted variable value with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: Value,
    /// Type name of `value` at write time.
    pub type_tag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    pub fn new(value: Value, expires_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            type_tag: value.type_name().to_string(),
            value,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    /// Replaces the value, keeping the original creation time.
    pub fn updated(previous: Option<&StoredValue>, value: Value, expires_at: Option<DateTime<Utc>>) -> Self {
        let mut stored = Self::new(value, expires_at);
        if let Some(previous) = previous {
            stored.created_at = previous.created_at;
        }
        stored
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A table row: column name to value.
pub type Row = ValueMap;

/// Row selection and ordering for [`StorageAdapter::query`].
///
/// `filter` matches rows whose columns equal every given value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: ValueMap,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryOptions {
    pub fn filtered(filter: ValueMap) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Trait that abstracts persistent storage for variables and tables.
///
/// # Thread Safety
///
/// Implementations are shared between concurrently executing invocations
/// and must be `Send + Sync`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read a stored value.
    ///
    /// # Returns
    /// * `Ok(Some(StoredValue))` - The value, including expired ones
    /// * `Ok(None)` - If the key does not exist
    ///
    /// # Expected Behavior
    ///
    /// - Expiry is enforced by the caller, not the adapter
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError>;

    /// Remove a value.
    ///
    /// # Returns
    /// * `Ok(true)` - If a value was removed
    /// * `Ok(false)` - If the key did not exist
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn has(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys matching a glob pattern.
    ///
    /// # Arguments
    /// * `pattern` - Glob pattern such as `guild:42:*`
    ///
    /// # Expected Behavior
    ///
    /// - Should return keys in a stable order
    /// - Should reject patterns the backend cannot interpret with `InvalidKey`
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every stored value. Tables are left intact.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Create a table if it does not exist yet.
    ///
    /// # Expected Behavior
    ///
    /// - Should be idempotent
    async fn create_table(&self, name: &str, def: &TableDef) -> Result<(), StorageError>;

    /// Insert a row.
    ///
    /// # Returns
    /// * `Ok(Row)` - The stored row, including generated columns
    ///
    /// # Expected Behavior
    ///
    /// - Should generate a primary key when the table has one and the row
    ///   omits it
    /// - Should fail with `DuplicateKey` when the primary key is taken
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StorageError>;

    /// Apply `changes` to every row matching `filter`.
    ///
    /// # Returns
    /// * `Ok(u64)` - Number of rows updated
    async fn update(&self, table: &str, filter: &ValueMap, changes: &ValueMap) -> Result<u64, StorageError>;

    /// Remove every row matching `filter`.
    ///
    /// # Returns
    /// * `Ok(u64)` - Number of rows removed
    async fn delete_rows(&self, table: &str, filter: &ValueMap) -> Result<u64, StorageError>;

    async fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>, StorageError>;

    /// Release backend resources. Later calls may fail with `Closed`.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Whether `row` satisfies an equality filter. Numbers compare by value.
pub fn row_matches(row: &Row, filter: &ValueMap) -> bool {
    filter.iter().all(|(column, expected)| {
        row.get(column)
            .map(|actual| actual.loose_eq(expected))
            .unwrap_or_else(|| expected.is_null())
    })
}
