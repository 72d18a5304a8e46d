//! Field-value datasets.
//!
//! A [`Row`] is the flat, column-keyed shape that travels between the
//! mapping layer and the connection collaborator. Columns keep their
//! insertion order so statements built from a row are deterministic.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;

/// An ordered set of `column -> value` pairs.
#[derive(Debug, Clone, Default)]
pub struct Row {
    /// Column names in order
    names: Vec<String>,
    /// Values, parallel to `names`
    values: Vec<Value>,
    /// column -> position
    index: HashMap<String, usize>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column value, replacing any existing value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        if let Some(&i) = self.index.get(&column) {
            self.values[i] = value;
        } else {
            self.index.insert(column.clone(), self.names.len());
            self.names.push(column);
            self.values.push(value);
        }
    }

    /// Remove a column, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let i = self.index.remove(column)?;
        self.names.remove(i);
        let value = self.values.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.index.get(column).map(|&i| &self.values[i])
    }

    /// Get a value by column name, treating a missing column as NULL.
    pub fn get_or_null(&self, column: &str) -> Value {
        self.get(column).cloned().unwrap_or(Value::Null)
    }

    /// Is `column` present (possibly NULL)?
    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// True when every named column is present and non-NULL.
    pub fn has_values_for<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        !columns.is_empty()
            && columns
                .iter()
                .all(|c| self.get(c.as_ref()).is_some_and(|v| !v.is_null()))
    }

    /// Collect the values of the named columns in order (missing -> NULL).
    pub fn values_for<S: AsRef<str>>(&self, columns: &[S]) -> Vec<Value> {
        columns.iter().map(|c| self.get_or_null(c.as_ref())).collect()
    }

    /// Copy every column of `other` into this row.
    pub fn extend_from(&mut self, other: &Row) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    /// A new row holding only the named columns that are present.
    #[must_use]
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Row {
        let mut out = Row::new();
        for column in columns {
            if let Some(value) = self.get(column.as_ref()) {
                out.set(column.as_ref(), value.clone());
            }
        }
        out
    }

    /// Typed read; a missing column is a type error naming the column.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Get all column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// `(column, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }
}

impl PartialEq for Row {
    /// Rows are equal when they hold the same columns with the same values,
    /// regardless of column order.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name).is_some_and(|v| v.key_eq(value)))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_error("i64", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| type_error("i32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_error("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error("String", value))
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
