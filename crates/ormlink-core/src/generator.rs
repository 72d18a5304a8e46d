//! Primary key value generators.
//!
//! A generator fills an unset key column just before its owner is inserted.

use crate::error::{Error, Result};
use crate::statement::{Condition, Connection, Statement};
use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Produces the next value for a generated column.
pub trait ValueGenerator: Send + Sync + fmt::Debug {
    #[allow(clippy::result_large_err)]
    fn next_value(&self, connection: &dyn Connection) -> Result<Value>;
}

/// Draws values from a named database sequence.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    sequence: String,
}

impl SequenceGenerator {
    pub fn new(sequence: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
        }
    }
}

impl ValueGenerator for SequenceGenerator {
    fn next_value(&self, connection: &dyn Connection) -> Result<Value> {
        connection.next_sequence_value(&self.sequence)
    }
}

/// Keeps counters in a table: one row per key, holding the last value
/// handed out.
#[derive(Debug, Clone)]
pub struct TableGenerator {
    table: String,
    key_column: String,
    value_column: String,
    key: String,
}

impl TableGenerator {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            value_column: value_column.into(),
            key: key.into(),
        }
    }
}

impl ValueGenerator for TableGenerator {
    fn next_value(&self, connection: &dyn Connection) -> Result<Value> {
        let by_key = Condition::eq(self.key_column.as_str(), self.key.as_str());
        let rows = connection.query(&Statement::select_columns(
            self.table.as_str(),
            &[self.value_column.as_str()],
            by_key.clone(),
        ))?;

        let Some(row) = rows.first() else {
            tracing::debug!(table = %self.table, key = %self.key, "Starting generator counter");
            connection.execute(&Statement::insert(
                self.table.as_str(),
                Row::new()
                    .with(self.key_column.as_str(), self.key.as_str())
                    .with(self.value_column.as_str(), 1_i64),
            ))?;
            return Ok(Value::BigInt(1));
        };

        let current: i64 = row.get_named(&self.value_column)?;
        let next = current.checked_add(1).ok_or_else(|| {
            Error::Custom(format!(
                "generator row '{}' in '{}' is exhausted at {current}",
                self.key, self.table
            ))
        })?;
        let affected = connection.execute(&Statement::update(
            self.table.as_str(),
            Row::new().with(self.value_column.as_str(), next),
            by_key.and(self.value_column.as_str(), current),
        ))?;
        if affected == 0 {
            return Err(Error::Custom(format!(
                "generator row '{}' in '{}' changed concurrently",
                self.key, self.table
            )));
        }
        Ok(Value::BigInt(next))
    }
}

/// Declarative generator settings, as found in mapping documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Sequence {
        sequence: String,
    },
    Table {
        table: String,
        key_column: String,
        value_column: String,
        key: String,
    },
}

impl GeneratorConfig {
    pub fn build(&self) -> Arc<dyn ValueGenerator> {
        match self {
            GeneratorConfig::Sequence { sequence } => Arc::new(SequenceGenerator::new(sequence)),
            GeneratorConfig::Table {
                table,
                key_column,
                value_column,
                key,
            } => Arc::new(TableGenerator::new(table, key_column, value_column, key)),
        }
    }
}
