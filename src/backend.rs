//! Database backend abstraction
//!
//! `Database` is the seam between the ORM core and a concrete driver: SQL
//! execution, row fetching, live table introspection, and capability flags.
//! The diff engine, query builders, and record lifecycle only ever talk to
//! this trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::dialect::SqlDialect;
use crate::error::{OrmError, OrmResult};
use crate::schema::Table;
use crate::value::DbValue;

/// Optional backend capabilities the core probes before using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Joins may reference tables in a different database
    CrossDatabaseQueries,
    /// INSERT can hand back the generated key via RETURNING
    InsertReturning,
}

/// One fetched row: column name to value
#[derive(Debug, Clone, Default)]
pub struct SqlRow {
    values: HashMap<String, DbValue>,
}

impl SqlRow {
    pub fn new(values: HashMap<String, DbValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.values.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.values.get(column).and_then(DbValue::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(DbValue::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn into_values(self) -> HashMap<String, DbValue> {
        self.values
    }
}

impl FromIterator<(String, DbValue)> for SqlRow {
    fn from_iter<T: IntoIterator<Item = (String, DbValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Abstract database connection used by the whole ORM core
#[async_trait]
pub trait Database: Send + Sync {
    /// Registry name of this database
    fn name(&self) -> &str;

    fn dialect(&self) -> &dyn SqlDialect;

    fn supports(&self, capability: Capability) -> bool;

    /// Execute a statement, returning affected row count
    async fn execute(&self, sql: &str, params: &[DbValue]) -> OrmResult<u64>;

    async fn fetch_all(&self, sql: &str, params: &[DbValue]) -> OrmResult<Vec<SqlRow>>;

    async fn fetch_optional(&self, sql: &str, params: &[DbValue]) -> OrmResult<Option<SqlRow>>;

    /// Reflect a live table's structure.
    ///
    /// Returns `OrmError::TableNotFound` when the table does not exist; the
    /// schema synchronizer degrades to CREATE in that case.
    async fn table_definition(&self, table_name: &str) -> OrmResult<Table>;
}

impl dyn Database + '_ {
    /// Fetch a single scalar (first column of the first row), or None
    pub async fn fetch_i64(&self, sql: &str, params: &[DbValue]) -> OrmResult<Option<i64>> {
        let row = self.fetch_optional(sql, params).await?;
        Ok(row.and_then(|r| {
            let column = r.columns().next().map(str::to_string)?;
            r.get_i64(&column)
        }))
    }
}

/// Per-name cache of open databases
#[derive(Default)]
pub struct DatabaseRegistry {
    databases: DashMap<String, Arc<dyn Database>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, database: Arc<dyn Database>) {
        self.databases.insert(database.name().to_string(), database);
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<dyn Database>> {
        self.databases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrmError::Connection(format!("no database registered as '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.databases.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDatabase;

    #[test]
    fn registry_round_trip() {
        let registry = DatabaseRegistry::new();
        registry.register(Arc::new(MockDatabase::new("main")));
        assert!(registry.get("main").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(OrmError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn scalar_fetch_reads_first_column() {
        let db = MockDatabase::new("main");
        db.push_fetch_rows(vec![SqlRow::from_iter([(
            "count".to_string(),
            DbValue::Int(3),
        )])]);
        let db: &dyn Database = &db;
        let value = db.fetch_i64("SELECT COUNT(*) AS count FROM users", &[]).await;
        assert_eq!(value.unwrap(), Some(3));
    }
}
