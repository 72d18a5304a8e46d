//! Statements and the connection collaborator.
//!
//! The mapping layer never renders SQL. It describes what it needs as a
//! [`Statement`] (entity, columns, [`Condition`]) and hands it to a
//! [`Connection`], which owns dialect translation, binding and execution.

use crate::Result;
use crate::error::{Error, QueryError, QueryErrorKind};
use crate::row::Row;
use crate::value::Value;
use std::fmt;

/// A conjunction of column equality tests.
///
/// A `Value::Null` term means `column IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    terms: Vec<(String, Value)>,
}

impl Condition {
    /// A condition that matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            terms: vec![(column.into(), value.into())],
        }
    }

    /// Add another `column = value` term.
    #[must_use]
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((column.into(), value.into()));
        self
    }

    /// Build a condition from parallel column and value lists.
    pub fn from_pairs<S: AsRef<str>>(columns: &[S], values: &[Value]) -> Self {
        Self {
            terms: columns
                .iter()
                .zip(values)
                .map(|(c, v)| (c.as_ref().to_string(), v.clone()))
                .collect(),
        }
    }

    /// Equality terms in declaration order.
    pub fn terms(&self) -> &[(String, Value)] {
        &self.terms
    }

    /// True if this condition has no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate the condition against a dataset.
    pub fn matches(&self, row: &Row) -> bool {
        self.terms.iter().all(|(column, expected)| {
            let actual = row.get_or_null(column);
            if expected.is_null() {
                actual.is_null()
            } else {
                actual.key_eq(expected)
            }
        })
    }

    /// Bind values in term order (NULL terms bind nothing).
    pub fn bind_values(&self) -> Vec<Value> {
        self.terms
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "TRUE");
        }
        for (i, (column, value)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            if value.is_null() {
                write!(f, "{column} IS NULL")?;
            } else {
                write!(f, "{column} = ?")?;
            }
        }
        Ok(())
    }
}

/// A data-manipulation or query request against one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read rows; an empty column list means every column.
    Select {
        entity: String,
        columns: Vec<String>,
        condition: Condition,
    },
    /// Insert one row.
    Insert { entity: String, values: Row },
    /// Update the matching rows.
    Update {
        entity: String,
        values: Row,
        condition: Condition,
    },
    /// Delete the matching rows.
    Delete { entity: String, condition: Condition },
}

impl Statement {
    pub fn select(entity: impl Into<String>, condition: Condition) -> Self {
        Statement::Select {
            entity: entity.into(),
            columns: Vec::new(),
            condition,
        }
    }

    pub fn select_columns<S: AsRef<str>>(
        entity: impl Into<String>,
        columns: &[S],
        condition: Condition,
    ) -> Self {
        Statement::Select {
            entity: entity.into(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            condition,
        }
    }

    pub fn insert(entity: impl Into<String>, values: Row) -> Self {
        Statement::Insert {
            entity: entity.into(),
            values,
        }
    }

    pub fn update(entity: impl Into<String>, values: Row, condition: Condition) -> Self {
        Statement::Update {
            entity: entity.into(),
            values,
            condition,
        }
    }

    pub fn delete(entity: impl Into<String>, condition: Condition) -> Self {
        Statement::Delete {
            entity: entity.into(),
            condition,
        }
    }

    /// Target entity name.
    pub fn entity(&self) -> &str {
        match self {
            Statement::Select { entity, .. }
            | Statement::Insert { entity, .. }
            | Statement::Update { entity, .. }
            | Statement::Delete { entity, .. } => entity,
        }
    }

    /// Statement verb, for logging.
    pub const fn verb(&self) -> &'static str {
        match self {
            Statement::Select { .. } => "SELECT",
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete { .. } => "DELETE",
        }
    }

    /// Values in bind order.
    pub fn bind_values(&self) -> Vec<Value> {
        match self {
            Statement::Select { condition, .. } | Statement::Delete { condition, .. } => {
                condition.bind_values()
            }
            Statement::Insert { values, .. } => values.iter().map(|(_, v)| v.clone()).collect(),
            Statement::Update {
                values, condition, ..
            } => {
                let mut out: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
                out.extend(condition.bind_values());
                out
            }
        }
    }
}

impl fmt::Display for Statement {
    /// A dialect-neutral preview used in logs and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select {
                entity,
                columns,
                condition,
            } => {
                let cols = if columns.is_empty() {
                    "*".to_string()
                } else {
                    columns.join(", ")
                };
                write!(f, "SELECT {cols} FROM {entity} WHERE {condition}")
            }
            Statement::Insert { entity, values } => {
                let cols: Vec<&str> = values.column_names().collect();
                let marks = vec!["?"; cols.len()].join(", ");
                write!(f, "INSERT INTO {entity} ({}) VALUES ({marks})", cols.join(", "))
            }
            Statement::Update {
                entity,
                values,
                condition,
            } => {
                let sets: Vec<String> = values.column_names().map(|c| format!("{c} = ?")).collect();
                write!(f, "UPDATE {entity} SET {} WHERE {condition}", sets.join(", "))
            }
            Statement::Delete { entity, condition } => {
                write!(f, "DELETE FROM {entity} WHERE {condition}")
            }
        }
    }
}

/// The external entity/connection collaborator.
///
/// Implementations translate statements for their store and execute them.
/// Errors they return pass through the mapping layer unmodified.
pub trait Connection {
    /// Run a `Select` statement and return every matching row.
    #[allow(clippy::result_large_err)]
    fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run an `Insert`, `Update` or `Delete` statement, returning the number
    /// of affected rows.
    #[allow(clippy::result_large_err)]
    fn execute(&self, statement: &Statement) -> Result<u64>;

    /// Next value of a named database sequence.
    #[allow(clippy::result_large_err)]
    fn next_sequence_value(&self, sequence: &str) -> Result<Value> {
        Err(Error::Query(QueryError {
            kind: QueryErrorKind::Unsupported,
            statement: None,
            message: format!("connection does not provide sequence '{sequence}'"),
            source: None,
        }))
    }

    /// Open a transaction boundary. Connections without transactions keep
    /// the no-op default.
    #[allow(clippy::result_large_err)]
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    /// Close the current transaction boundary successfully.
    #[allow(clippy::result_large_err)]
    fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// Abandon the current transaction boundary.
    #[allow(clippy::result_large_err)]
    fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

impl<C: Connection + ?Sized> Connection for &C {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        (**self).query(statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64> {
        (**self).execute(statement)
    }

    fn next_sequence_value(&self, sequence: &str) -> Result<Value> {
        (**self).next_sequence_value(sequence)
    }

    fn begin(&self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}
