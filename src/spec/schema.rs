//! Declared state: scoped variables and tables.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::duration;
use crate::state::StateScope;
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDef>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,
}

fn persist_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    #[serde(default)]
    pub scope: StateScope,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub default: Value,
    #[serde(
        default,
        with = "duration::flexible_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,
    /// When false the value lives in the cache only.
    #[serde(default = "persist_default")]
    pub persist: bool,
}

impl Default for VariableDef {
    fn default() -> Self {
        Self {
            scope: StateScope::default(),
            value_type: None,
            default: Value::Null,
            ttl: None,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Json,
    Timestamp,
}

impl ColumnType {
    /// Whether `value` may be stored in a column of this type. Null is always
    /// accepted.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ColumnType::Json, _) => true,
            (ColumnType::String, Value::String(_)) => true,
            (ColumnType::Number, v) => v.is_number(),
            (ColumnType::Integer, Value::Integer(_)) => true,
            (ColumnType::Boolean, Value::Boolean(_)) => true,
            (ColumnType::Timestamp, Value::String(_) | Value::Integer(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDef>,
}

impl TableDef {
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, column)| column.primary)
            .map(|(name, _)| name.as_str())
    }
}
