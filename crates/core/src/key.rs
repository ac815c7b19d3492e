//! Primary key values
//!
//! Rows are addressed by a `RowKey`: the ordered values of the table's
//! primary-key columns. Only Int and String columns may take part in a
//! primary key, which gives keys a total order for `BTreeMap` storage.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One component of a primary key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    /// Integer component
    Int(i64),
    /// String component
    String(String),
}

impl KeyPart {
    /// Convert a column value into a key component
    ///
    /// Fails for any value that is not Int or String (including Null).
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(KeyPart::Int(*i)),
            Value::String(s) => Ok(KeyPart::String(s.clone())),
            other => Err(Error::InvalidOperation(format!(
                "{} value cannot be used as a key",
                other.type_name()
            ))),
        }
    }

    /// Back to a column value
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Int(i) => Value::Int(*i),
            KeyPart::String(s) => Value::String(s.clone()),
        }
    }
}

/// Primary key of a row (one part per primary-key column)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(Vec<KeyPart>);

impl RowKey {
    /// Create a key from its parts
    pub fn new(parts: Vec<KeyPart>) -> Self {
        RowKey(parts)
    }

    /// Single-column key
    pub fn single(part: KeyPart) -> Self {
        RowKey(vec![part])
    }

    /// Build a key from column values
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Result<Self> {
        values
            .into_iter()
            .map(KeyPart::from_value)
            .collect::<Result<Vec<_>>>()
            .map(RowKey)
    }

    /// Key components in primary-key column order
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Key components as column values
    pub fn to_values(&self) -> Vec<Value> {
        self.0.iter().map(KeyPart::to_value).collect()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", part.to_value())?;
        }
        f.write_str(")")
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey::single(KeyPart::String(s.to_string()))
    }
}

impl From<i64> for RowKey {
    fn from(i: i64) -> Self {
        RowKey::single(KeyPart::Int(i))
    }
}
