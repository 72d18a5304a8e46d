//! Dynamic column values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed column value.
///
/// Every field of a mapped object and every column of a dataset holds one
/// of these. The connection collaborator is responsible for binding them to
/// its own wire representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Also what an unset attribute reads as.
    #[default]
    Null,

    Bool(bool),

    Int(i32),

    BigInt(i64),

    Double(f64),

    Text(String),

    Bytes(Vec<u8>),

    /// Structured document column
    Json(serde_json::Value),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL-style name of the variant, used in type errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Json(_) => "JSON",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Integer view; booleans read as 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Render this value as a fragment of a key signature.
    ///
    /// Integer widths collapse onto one representation so that a key read
    /// back from a store as `BigInt` matches the `Int` it was written with.
    pub fn key_fragment(&self) -> String {
        match self {
            Value::Null => "∅".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(v) => format!("i:{v}"),
            Value::BigInt(v) => format!("i:{v}"),
            Value::Double(v) => format!("f:{v}"),
            Value::Text(s) => format!("s:{s}"),
            Value::Bytes(b) => format!("x:{b:02x?}"),
            Value::Json(j) => format!("j:{j}"),
        }
    }

    /// Compare two values for key equality (integer widths are unified).
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self.as_i64_strict(), other.as_i64_strict()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn as_i64_strict(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

/// Build the ordered key signature of a list of key values.
///
/// Two rows with the same primary key produce the same signature regardless
/// of integer width.
pub fn key_signature(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::key_fragment)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
