//! Row representation shared by resolvers and backends.
//!
//! # Responsibility
//! - Hold one object's storage representation as column/value pairs.
//! - Decode typed column values with explicit errors instead of panics.
//!
//! # Invariants
//! - Column iteration order is stable (sorted by column name), so insert
//!   column lists and bound values always line up.

use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Typed access failure on a [`Row`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    MissingColumn(String),
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl Display for RowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingColumn(column) => write!(f, "column `{column}` is missing from row"),
            Self::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(
                f,
                "column `{column}` holds {actual}, expected {expected}"
            ),
        }
    }
}

impl Error for RowError {}

/// Column/value map for one stored object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(column, value);
        self
    }

    /// Sets `column`, replacing any previous value.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(column, value)| (column.as_str(), value))
    }

    /// Returns a copy without `column`; used to compare rows ignoring
    /// backend-assigned identity.
    pub fn without(&self, column: &str) -> Self {
        let mut copy = self.clone();
        copy.values.remove(column);
        copy
    }

    pub fn i64(&self, column: &str) -> Result<i64, RowError> {
        self.opt_i64(column)?
            .ok_or_else(|| mismatch(column, "integer", &Value::Null))
    }

    pub fn opt_i64(&self, column: &str) -> Result<Option<i64>, RowError> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    pub fn f64(&self, column: &str) -> Result<f64, RowError> {
        match self.require(column)? {
            Value::Real(value) => Ok(*value),
            // SQLite stores whole REAL values as integers when affinity allows.
            Value::Integer(value) => Ok(*value as f64),
            other => Err(mismatch(column, "real", other)),
        }
    }

    pub fn bool(&self, column: &str) -> Result<bool, RowError> {
        match self.require(column)? {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            other => Err(mismatch(column, "boolean integer", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, RowError> {
        self.opt_text(column)?
            .ok_or_else(|| mismatch(column, "text", &Value::Null))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, RowError> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(mismatch(column, "text", other)),
        }
    }

    pub fn blob(&self, column: &str) -> Result<Vec<u8>, RowError> {
        match self.require(column)? {
            Value::Blob(value) => Ok(value.clone()),
            other => Err(mismatch(column, "blob", other)),
        }
    }

    fn require(&self, column: &str) -> Result<&Value, RowError> {
        self.values
            .get(column)
            .ok_or_else(|| RowError::MissingColumn(column.to_string()))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

fn mismatch(column: &str, expected: &'static str, actual: &Value) -> RowError {
    RowError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: value_kind(actual),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}
