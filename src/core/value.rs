// Scalar values, rows projected as ordered column maps, and batches of rows.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
}

impl Value {
    /// SQL-style comparison: NULL and mixed types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn from_json(value: &JsonValue) -> Result<Self, Error> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::String(text) => Ok(Value::Str(text.clone())),
            JsonValue::Number(number) => number.as_i64().map(Value::Int).ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("number {number} is not a 64-bit integer"))
            }),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported value {other}; expected string, integer, or null"))),
        }
    }

    /// Parses a command-line parameter: integers become `Int`, `null` becomes `Null`.
    pub fn parse_param(text: &str) -> Self {
        if text == "null" {
            return Value::Null;
        }
        match text.parse::<i64>() {
            Ok(value) => Value::Int(value),
            Err(_) => Value::Str(text.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "'{value}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(value) => serializer.serialize_i64(*value),
            Value::Str(value) => serializer.serialize_str(value),
        }
    }
}

/// One row: column names shared across a result set, values in column order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Result<Self, Error> {
        if columns.len() != values.len() {
            return Err(Error::new(ErrorKind::Internal).with_message(format!(
                "record has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| &self.values[index])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Rows returned by one bounded fetch. An empty batch means "no more data".
pub type Batch = Vec<Record>;
