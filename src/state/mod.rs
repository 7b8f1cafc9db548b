//! Scoped persistent state.
//!
//! Variables are declared in the specification with a scope (`global`,
//! `guild`, `channel`, `user`, `member`), an optional default and TTL. The
//! [`StateManager`] resolves each access to a [`StateKey`], serves reads from
//! a bounded cache and writes through to a [`StorageAdapter`].
//! Read-modify-write operations run under a per-key lock.

pub mod cache;
pub mod key;
pub mod lock;
pub mod memory;
pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::StateConfig;
use crate::spec::{StateSchema, TableDef, VariableDef};
use crate::value::{is_reserved_key, Value, ValueMap};

pub use cache::{CacheEntry, EvictionPolicy, StateCache};
pub use key::{ScopeContext, ScopeIds, StateKey, StateScope};
pub use lock::KeyLocks;
pub use memory::InMemoryStorage;
pub use storage::{QueryOptions, Row, StorageAdapter, StorageError, StoredValue};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Variable `{name}` has {scope} scope but the context has no {missing}")]
    InvalidScopeContext {
        name: String,
        scope: StateScope,
        missing: String,
    },
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Unknown column `{column}` in table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("Column `{column}` in table {table} does not accept {found}")]
    ColumnType {
        table: String,
        column: String,
        found: String,
    },
    #[error("Variable `{name}` holds {found}, expected {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("Timed out after {timeout:?} waiting for lock on {key}")]
    LockTimeout { key: String, timeout: Duration },
    #[error("Security rejection: {0}")]
    SecurityRejection(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type StateResult<T> = Result<T, StateError>;

/// Rejects keys that could reach a shared prototype.
pub fn check_key(key: &str) -> StateResult<()> {
    if is_reserved_key(key) {
        return Err(StateError::SecurityRejection(format!(
            "reserved key `{}`",
            key
        )));
    }
    Ok(())
}

pub struct StateManager {
    storage: Arc<dyn StorageAdapter>,
    variables: HashMap<String, VariableDef>,
    tables: DashMap<String, TableDef>,
    created_tables: DashMap<String, ()>,
    cache: Mutex<StateCache>,
    locks: KeyLocks,
    config: StateConfig,
}

impl StateManager {
    pub fn new(storage: Arc<dyn StorageAdapter>, schema: &StateSchema, config: StateConfig) -> Self {
        debug!(
            variables = schema.variables.len(),
            tables = schema.tables.len(),
            cache_capacity = config.cache_capacity,
            "Creating StateManager"
        );
        Self {
            storage,
            variables: schema.variables.clone().into_iter().collect(),
            tables: schema.tables.clone().into_iter().collect(),
            created_tables: DashMap::new(),
            cache: Mutex::new(StateCache::new(config.cache_capacity, config.eviction)),
            locks: KeyLocks::new(),
            config,
        }
    }

    /// A manager over fresh in-memory storage with default settings.
    pub fn in_memory(schema: &StateSchema) -> Self {
        Self::new(
            Arc::new(InMemoryStorage::new()),
            schema,
            StateConfig::default(),
        )
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDef> {
        self.variables.get(name)
    }

    pub fn is_strict(&self) -> bool {
        self.config.strict_variables
    }

    pub fn active_locks(&self) -> usize {
        self.locks.active()
    }

    fn definition(&self, name: &str) -> StateResult<VariableDef> {
        check_key(name)?;
        match self.variables.get(name) {
            Some(def) => Ok(def.clone()),
            None if self.config.strict_variables => {
                Err(StateError::UnknownVariable(name.to_string()))
            }
            None => Ok(VariableDef::default()),
        }
    }

    pub fn key_for(&self, name: &str, ctx: &ScopeContext) -> StateResult<StateKey> {
        let def = self.definition(name)?;
        StateKey::resolve(name, def.scope, ctx)
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn get(&self, name: &str, ctx: &ScopeContext) -> StateResult<Value> {
        let def = self.definition(name)?;
        let key = StateKey::resolve(name, def.scope, ctx)?;
        self.read(&key, &def).await
    }

    #[tracing::instrument(skip(self, value, ctx))]
    pub async fn set(&self, name: &str, value: Value, ctx: &ScopeContext) -> StateResult<()> {
        let def = self.definition(name)?;
        let key = StateKey::resolve(name, def.scope, ctx)?;
        let _guard = self.lock(&key).await?;
        self.write(&key, &def, value).await
    }

    pub async fn increment(&self, name: &str, by: &Value, ctx: &ScopeContext) -> StateResult<Value> {
        let by = by.clone();
        self.update(name, ctx, move |current| add_numbers(name, &current, &by))
            .await
    }

    pub async fn decrement(&self, name: &str, by: &Value, ctx: &ScopeContext) -> StateResult<Value> {
        self.increment(name, &negate(by), ctx).await
    }

    /// Locked read-modify-write. The lock is released whether `f` succeeds
    /// or not; on error nothing is written.
    pub async fn update<F>(&self, name: &str, ctx: &ScopeContext, f: F) -> StateResult<Value>
    where
        F: FnOnce(Value) -> StateResult<Value> + Send,
    {
        let def = self.definition(name)?;
        let key = StateKey::resolve(name, def.scope, ctx)?;
        let _guard = self.lock(&key).await?;
        let current = self.read(&key, &def).await?;
        let next = f(current)?;
        self.write(&key, &def, next.clone()).await?;
        Ok(next)
    }

    pub async fn delete(&self, name: &str, ctx: &ScopeContext) -> StateResult<bool> {
        let def = self.definition(name)?;
        let key = StateKey::resolve(name, def.scope, ctx)?;
        let storage_key = key.storage_key();
        let _guard = self.lock(&key).await?;
        let cached = self.cache.lock().await.remove(&storage_key).is_some();
        let stored = self.storage.delete(&storage_key).await?;
        Ok(cached || stored)
    }

    /// Values of every declared variable reachable from `ctx`, grouped as
    /// `{scope: {name: value}}`.
    pub async fn snapshot(&self, ctx: &ScopeContext) -> StateResult<ValueMap> {
        let mut view = ValueMap::new();
        for scope in StateScope::ALL {
            view.insert(scope.to_string(), Value::Map(ValueMap::new()));
        }
        for (name, def) in &self.variables {
            let key = match StateKey::resolve(name, def.scope, ctx) {
                Ok(key) => key,
                Err(_) => continue,
            };
            let value = self.read(&key, def).await?;
            if let Some(Value::Map(scope)) = view.get_mut(def.scope.as_ref()) {
                scope.insert(name.clone(), value);
            }
        }
        Ok(view)
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.lock().await.purge_expired()
    }

    async fn lock(&self, key: &StateKey) -> StateResult<lock::KeyGuard> {
        self.locks
            .acquire(&key.storage_key(), self.config.lock_timeout)
            .await
    }

    async fn read(&self, key: &StateKey, def: &VariableDef) -> StateResult<Value> {
        let storage_key = key.storage_key();
        if let Some(entry) = self.cache.lock().await.get(&storage_key) {
            return Ok(entry.value().clone());
        }
        if !def.persist {
            return Ok(def.default.clone());
        }
        match self.storage.get(&storage_key).await? {
            Some(stored) if stored.is_expired() => {
                debug!(key = %storage_key, "Stored value expired");
                self.storage.delete(&storage_key).await?;
                Ok(def.default.clone())
            }
            Some(stored) => {
                self.cache
                    .lock()
                    .await
                    .insert(&storage_key, CacheEntry::new(stored.value.clone(), stored.expires_at));
                Ok(stored.value)
            }
            None => Ok(def.default.clone()),
        }
    }

    async fn write(&self, key: &StateKey, def: &VariableDef, value: Value) -> StateResult<()> {
        let storage_key = key.storage_key();
        let expires_at = expiry(def.ttl);
        if def.persist {
            let previous = self.storage.get(&storage_key).await?;
            let stored = StoredValue::updated(previous.as_ref(), value.clone(), expires_at);
            self.storage.set(&storage_key, stored).await?;
        }
        self.cache
            .lock()
            .await
            .insert(&storage_key, CacheEntry::new(value, expires_at));
        Ok(())
    }

    // tables

    pub async fn register_table(&self, name: &str, def: TableDef) -> StateResult<()> {
        check_key(name)?;
        for column in def.columns.keys() {
            check_key(column)?;
        }
        self.storage.create_table(name, &def).await?;
        self.tables.insert(name.to_string(), def);
        self.created_tables.insert(name.to_string(), ());
        Ok(())
    }

    async fn table(&self, name: &str) -> StateResult<TableDef> {
        let def = self
            .tables
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StateError::UnknownTable(name.to_string()))?;
        if !self.created_tables.contains_key(name) {
            self.storage.create_table(name, &def).await?;
            self.created_tables.insert(name.to_string(), ());
        }
        Ok(def)
    }

    fn check_columns(table: &str, def: &TableDef, values: &ValueMap, typed: bool) -> StateResult<()> {
        for (column, value) in values {
            check_key(column)?;
            let column_def = def.columns.get(column).ok_or_else(|| StateError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            })?;
            if typed && !column_def.column_type.accepts(value) {
                return Err(StateError::ColumnType {
                    table: table.to_string(),
                    column: column.clone(),
                    found: value.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, row))]
    pub async fn insert(&self, table: &str, mut row: Row) -> StateResult<Row> {
        let def = self.table(table).await?;
        Self::check_columns(table, &def, &row, true)?;
        for (column, column_def) in &def.columns {
            if let Some(default) = &column_def.default {
                row.entry(column.clone()).or_insert_with(|| default.clone());
            }
        }
        Ok(self.storage.insert(table, row).await?)
    }

    pub async fn update_rows(&self, table: &str, filter: &ValueMap, changes: &ValueMap) -> StateResult<u64> {
        let def = self.table(table).await?;
        Self::check_columns(table, &def, filter, false)?;
        Self::check_columns(table, &def, changes, true)?;
        Ok(self.storage.update(table, filter, changes).await?)
    }

    pub async fn delete_rows(&self, table: &str, filter: &ValueMap) -> StateResult<u64> {
        let def = self.table(table).await?;
        Self::check_columns(table, &def, filter, false)?;
        Ok(self.storage.delete_rows(table, filter).await?)
    }

    pub async fn query(&self, table: &str, options: &QueryOptions) -> StateResult<Vec<Row>> {
        let def = self.table(table).await?;
        Self::check_columns(table, &def, &options.filter, false)?;
        if let Some(column) = &options.order_by {
            check_key(column)?;
            if !def.columns.contains_key(column) {
                return Err(StateError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(self.storage.query(table, options).await?)
    }
}

fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(ttl)
}

pub(crate) fn negate(by: &Value) -> Value {
    match by {
        Value::Integer(i) => i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or(Value::Float(-(*i as f64))),
        other => Value::Float(-other.as_f64().unwrap_or(0.0)),
    }
}

/// Numeric addition where a missing prior value counts as zero.
pub(crate) fn add_numbers(name: &str, current: &Value, by: &Value) -> StateResult<Value> {
    let not_numeric = |value: &Value| StateError::WrongType {
        name: name.to_string(),
        expected: "a number",
        found: value.type_name().to_string(),
    };
    let current = match current {
        Value::Null => Value::Integer(0),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .or_else(|_| s.trim().parse::<f64>().map(Value::Float))
            .map_err(|_| not_numeric(current))?,
        other if other.is_number() => other.clone(),
        other => return Err(not_numeric(other)),
    };
    match (&current, by) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a
            .checked_add(*b)
            .map(Value::Integer)
            .unwrap_or(Value::Float(*a as f64 + *b as f64))),
        _ => {
            let step = by.as_f64().ok_or_else(|| not_numeric(by))?;
            Ok(Value::Float(current.as_f64().unwrap_or(0.0) + step))
        }
    }
}
