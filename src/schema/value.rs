//! Column values and typed column accessors
//!
//! Archive rows are positional sequences of [`Value`]s. Each column's
//! [`ColumnKind`] decides how the value is read from the database, so a
//! column declared as `Integer` can never silently export text.

use base64::{engine::general_purpose::STANDARD, Engine};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BackupError, BackupResult};

/// A single row of a table snapshot, positional to the table's column mapping
pub type Row = Vec<Value>;

/// A column value as stored in an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Value {
    /// Get the text contents, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(b as i64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Storage class of a mapped column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Blob,
    /// Stored as INTEGER 0/1
    Boolean,
    /// Stored as INTEGER unix seconds (UTC)
    Timestamp,
}

impl ColumnKind {
    /// Read column `idx` of `row` as this kind
    pub fn read(self, row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Value> {
        let value = match self {
            ColumnKind::Integer | ColumnKind::Boolean | ColumnKind::Timestamp => {
                row.get::<_, Option<i64>>(idx)?.map(Value::Integer)
            }
            ColumnKind::Real => row.get::<_, Option<f64>>(idx)?.map(Value::Real),
            ColumnKind::Text => row.get::<_, Option<String>>(idx)?.map(Value::Text),
            ColumnKind::Blob => row.get::<_, Option<Vec<u8>>>(idx)?.map(Value::Blob),
        };
        Ok(value.unwrap_or(Value::Null))
    }

    /// Check that an archived value fits this kind
    pub fn check(self, column: &str, nullable: bool, value: &Value) -> BackupResult<()> {
        let ok = match (self, value) {
            (_, Value::Null) => nullable,
            (
                ColumnKind::Integer | ColumnKind::Boolean | ColumnKind::Timestamp,
                Value::Integer(_),
            ) => true,
            (ColumnKind::Real, Value::Real(_) | Value::Integer(_)) => true,
            (ColumnKind::Text, Value::Text(_)) => true,
            (ColumnKind::Blob, Value::Blob(_)) => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(BackupError::Format(format!(
                "Column '{}' expects {:?}{}, archive holds {}",
                column,
                self,
                if nullable { " or null" } else { "" },
                value.type_name()
            )))
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
