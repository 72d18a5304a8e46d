//! In-memory connection driver for ormlink.
//!
//! `MemoryConnection` keeps tables as vectors of rows and evaluates
//! statements directly against them. It records every statement it runs,
//! which makes it the driver of choice for tests that assert on ordering.
//!
//! Transactions are emulated with a snapshot: `begin` copies the tables,
//! `rollback` restores the copy, `commit` drops it.
//!
//! ```ignore
//! let conn = MemoryConnection::new()
//!     .with_primary_key("dept", &["deptno"])
//!     .with_row("dept", Row::new().with("deptno", 50).with("dname", "dept50"));
//!
//! let mut session = Session::new(catalog, &conn);
//! // ...
//! assert_eq!(conn.statements()[0], "INSERT INTO dept (deptno, dname) VALUES (?, ?)");
//! ```

use ormlink_core::{Connection, Error, QueryError, QueryErrorKind, Result, Row, Statement, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    keys: HashMap<String, Vec<String>>,
    sequences: HashMap<String, i64>,
    log: Vec<String>,
    snapshot: Option<HashMap<String, Vec<Row>>>,
    depth: usize,
    failures: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryConnection {
    state: Mutex<MemoryState>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Declare key columns for an entity; inserts that repeat a key fail
    /// with a constraint error.
    #[must_use]
    pub fn with_primary_key(self, entity: &str, columns: &[&str]) -> Self {
        self.lock().keys.insert(
            entity.to_string(),
            columns.iter().map(|c| (*c).to_string()).collect(),
        );
        self
    }

    /// Seed a row without logging a statement.
    #[must_use]
    pub fn with_row(self, entity: &str, row: Row) -> Self {
        self.seed(entity, row);
        self
    }

    /// Start a sequence so its first value is `start`.
    #[must_use]
    pub fn with_sequence(self, name: &str, start: i64) -> Self {
        self.lock().sequences.insert(name.to_string(), start - 1);
        self
    }

    pub fn seed(&self, entity: &str, row: Row) {
        self.lock()
            .tables
            .entry(entity.to_string())
            .or_default()
            .push(row);
    }

    /// Current rows of an entity.
    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.lock().tables.get(entity).cloned().unwrap_or_default()
    }

    /// Every statement and transaction marker, in execution order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Executed statements only (no `SELECT`s, no transaction markers).
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|line| {
                ["INSERT", "UPDATE", "DELETE"]
                    .iter()
                    .any(|verb| line.starts_with(verb))
            })
            .cloned()
            .collect()
    }

    /// Number of queries run so far.
    pub fn query_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|line| line.starts_with("SELECT"))
            .count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Make the next statement with this verb against this entity fail.
    pub fn fail_next(&self, verb: &str, entity: &str) {
        self.lock()
            .failures
            .push((verb.to_uppercase(), entity.to_string()));
    }

    fn injected_failure(state: &mut MemoryState, statement: &Statement) -> Option<Error> {
        let pos = state
            .failures
            .iter()
            .position(|(verb, entity)| verb == statement.verb() && entity == statement.entity())?;
        state.failures.remove(pos);
        Some(Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            statement: Some(statement.to_string()),
            message: format!("injected failure for {} on {}", statement.verb(), statement.entity()),
            source: None,
        }))
    }
}

fn duplicate_key(keys: &[String], existing: &[Row], row: &Row) -> bool {
    row.has_values_for(keys)
        && existing.iter().any(|other| {
            keys.iter()
                .all(|k| other.get_or_null(k).key_eq(&row.get_or_null(k)))
        })
}

impl Connection for MemoryConnection {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.log.push(statement.to_string());
        if let Some(err) = Self::injected_failure(&mut state, statement) {
            return Err(err);
        }
        let Statement::Select {
            entity,
            columns,
            condition,
        } = statement
        else {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Unsupported,
                statement: Some(statement.to_string()),
                message: "query() only runs SELECT statements".to_string(),
                source: None,
            }));
        };
        let rows = state
            .tables
            .get(entity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| condition.matches(r))
                    .map(|r| if columns.is_empty() { r.clone() } else { r.project(columns) })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn execute(&self, statement: &Statement) -> Result<u64> {
        let mut state = self.lock();
        state.log.push(statement.to_string());
        if let Some(err) = Self::injected_failure(&mut state, statement) {
            return Err(err);
        }
        tracing::trace!(statement = %statement, "Executing in memory");
        match statement {
            Statement::Insert { entity, values } => {
                let keys = state.keys.get(entity).cloned().unwrap_or_default();
                let table = state.tables.entry(entity.clone()).or_default();
                if !keys.is_empty() && duplicate_key(&keys, table, values) {
                    return Err(Error::Query(QueryError {
                        kind: QueryErrorKind::Constraint,
                        statement: Some(statement.to_string()),
                        message: format!("duplicate key in '{entity}'"),
                        source: None,
                    }));
                }
                table.push(values.clone());
                Ok(1)
            }
            Statement::Update {
                entity,
                values,
                condition,
            } => {
                let mut affected = 0;
                if let Some(rows) = state.tables.get_mut(entity) {
                    for row in rows.iter_mut().filter(|r| condition.matches(r)) {
                        row.extend_from(values);
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            Statement::Delete { entity, condition } => {
                let Some(rows) = state.tables.get_mut(entity) else {
                    return Ok(0);
                };
                let before = rows.len();
                rows.retain(|r| !condition.matches(r));
                Ok((before - rows.len()) as u64)
            }
            Statement::Select { .. } => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Unsupported,
                statement: Some(statement.to_string()),
                message: "execute() does not run SELECT statements".to_string(),
                source: None,
            })),
        }
    }

    fn next_sequence_value(&self, sequence: &str) -> Result<Value> {
        let mut state = self.lock();
        let next = state.sequences.entry(sequence.to_string()).or_insert(0);
        *next += 1;
        Ok(Value::BigInt(*next))
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.lock();
        if state.depth == 0 {
            state.snapshot = Some(state.tables.clone());
        }
        state.depth += 1;
        state.log.push("BEGIN".to_string());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.snapshot = None;
        }
        state.log.push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.lock();
        state.depth = 0;
        if let Some(tables) = state.snapshot.take() {
            state.tables = tables;
        }
        state.log.push("ROLLBACK".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlink_core::Condition;

    fn dept(no: i64, name: &str) -> Row {
        Row::new().with("deptno", no).with("dname", name)
    }

    #[test]
    fn evaluates_statements_against_tables() {
        let conn = MemoryConnection::new().with_row("dept", dept(10, "accounting"));
        conn.execute(&Statement::insert("dept", dept(50, "dept50")))
            .unwrap();
        let updated = conn
            .execute(&Statement::update(
                "dept",
                Row::new().with("dname", "sales"),
                Condition::eq("deptno", 50_i64),
            ))
            .unwrap();
        assert_eq!(updated, 1);

        let rows = conn
            .query(&Statement::select_columns("dept", &["dname"], Condition::eq("deptno", 50_i64)))
            .unwrap();
        assert_eq!(rows, vec![Row::new().with("dname", "sales")]);

        let deleted = conn
            .execute(&Statement::delete("dept", Condition::all()))
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(conn.rows("dept").is_empty());
        assert_eq!(conn.statements().len(), 3);
        assert_eq!(conn.query_count(), 1);

        conn.clear_log();
        assert!(conn.log().is_empty());
    }

    #[test]
    fn duplicate_keys_are_constraint_errors() {
        let conn = MemoryConnection::new()
            .with_primary_key("dept", &["deptno"])
            .with_row("dept", dept(50, "dept50"));
        let err = conn
            .execute(&Statement::insert("dept", dept(50, "again")))
            .unwrap_err();
        assert!(matches!(err, Error::Query(QueryError { kind: QueryErrorKind::Constraint, .. })));
    }

    #[test]
    fn rollback_restores_snapshot() {
        let conn = MemoryConnection::new().with_row("dept", dept(10, "accounting"));
        conn.begin().unwrap();
        conn.execute(&Statement::delete("dept", Condition::all()))
            .unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.rows("dept").len(), 1);
        assert_eq!(conn.log().first().map(String::as_str), Some("BEGIN"));
        assert_eq!(conn.log().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn sequences_count_from_start() {
        let conn = MemoryConnection::new().with_sequence("emp_seq", 100);
        assert_eq!(conn.next_sequence_value("emp_seq").unwrap(), Value::BigInt(100));
        assert_eq!(conn.next_sequence_value("emp_seq").unwrap(), Value::BigInt(101));
        assert_eq!(conn.next_sequence_value("other").unwrap(), Value::BigInt(1));
    }

    #[test]
    fn injected_failures_fire_once() {
        let conn = MemoryConnection::new();
        conn.fail_next("insert", "emp");
        assert!(conn.execute(&Statement::insert("emp", Row::new().with("empno", 1_i64))).is_err());
        assert!(conn.execute(&Statement::insert("emp", Row::new().with("empno", 1_i64))).is_ok());
    }
}
