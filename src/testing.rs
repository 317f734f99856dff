//! Test support
//!
//! `MockDatabase` is a scriptable in-memory stand-in for the `Database` seam:
//! it records every executed statement, serves canned fetch results, and can
//! be told to fail statements matching a substring. Used throughout the
//! crate's own tests and usable from downstream test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{Capability, Database, SqlRow};
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{OrmError, OrmResult};
use crate::schema::Table;
use crate::value::DbValue;

/// Scriptable mock implementation of `Database`
pub struct MockDatabase {
    name: String,
    dialect: PostgresDialect,
    cross_database: bool,
    tables: Mutex<HashMap<String, Table>>,
    executed: Mutex<Vec<(String, Vec<DbValue>)>>,
    execute_results: Mutex<VecDeque<u64>>,
    fetch_results: Mutex<VecDeque<Vec<SqlRow>>>,
    fail_patterns: Mutex<Vec<String>>,
}

impl MockDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialect: PostgresDialect,
            cross_database: false,
            tables: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            execute_results: Mutex::new(VecDeque::new()),
            fetch_results: Mutex::new(VecDeque::new()),
            fail_patterns: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cross_database(mut self, enabled: bool) -> Self {
        self.cross_database = enabled;
        self
    }

    /// Register a live table definition served by `table_definition`
    pub fn define_table(&self, table: Table) {
        self.tables
            .lock()
            .unwrap()
            .insert(table.name().to_string(), table);
    }

    /// Queue the affected-row count returned by the next `execute` call.
    /// Unqueued calls return 1.
    pub fn push_execute_result(&self, rows_affected: u64) {
        self.execute_results
            .lock()
            .unwrap()
            .push_back(rows_affected);
    }

    /// Queue the rows returned by the next fetch call
    pub fn push_fetch_rows(&self, rows: Vec<SqlRow>) {
        self.fetch_results.lock().unwrap().push_back(rows);
    }

    /// Make any statement containing `pattern` fail with a database error
    pub fn fail_matching(&self, pattern: impl Into<String>) {
        self.fail_patterns.lock().unwrap().push(pattern.into());
    }

    /// Every executed statement, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Executed statements with their bound parameters
    pub fn executed_with_params(&self) -> Vec<(String, Vec<DbValue>)> {
        self.executed.lock().unwrap().clone()
    }

    fn check_failure(&self, sql: &str) -> OrmResult<()> {
        let patterns = self.fail_patterns.lock().unwrap();
        if let Some(pattern) = patterns.iter().find(|p| sql.contains(p.as_str())) {
            return Err(OrmError::Database(format!(
                "scripted failure matching '{}'",
                pattern
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::CrossDatabaseQueries => self.cross_database,
            Capability::InsertReturning => true,
        }
    }

    async fn execute(&self, sql: &str, params: &[DbValue]) -> OrmResult<u64> {
        self.check_failure(sql)?;
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self.execute_results.lock().unwrap().pop_front().unwrap_or(1))
    }

    async fn fetch_all(&self, sql: &str, params: &[DbValue]) -> OrmResult<Vec<SqlRow>> {
        self.check_failure(sql)?;
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self
            .fetch_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn fetch_optional(&self, sql: &str, params: &[DbValue]) -> OrmResult<Option<SqlRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn table_definition(&self, table_name: &str) -> OrmResult<Table> {
        self.tables
            .lock()
            .unwrap()
            .get(table_name)
            .cloned()
            .ok_or_else(|| OrmError::TableNotFound(table_name.to_string()))
    }
}

/// Build a `SqlRow` from (column, value) pairs
pub fn row(values: impl IntoIterator<Item = (&'static str, DbValue)>) -> SqlRow {
    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
