//! Physical table representation
//!
//! Insertion order of columns is preserved; the diff engine relies on it for
//! deterministic output and `after_column` positioning hints.

use std::collections::HashMap;

use crate::dialect::SqlDialect;
use crate::error::{OrmError, OrmResult};

use super::column::Column;
use super::index::{Index, IndexKind};

/// Table-level options carried alongside columns and indexes
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    pub engine: Option<String>,
    /// SQL executed after CREATE TABLE
    pub on_create: Vec<String>,
    /// Per-column SQL to run alongside a DROP COLUMN
    pub remove_sql: HashMap<String, String>,
    /// Where this definition came from (class name, file, ...)
    pub source: Option<String>,
}

/// An in-memory table definition, live or declared
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    options: TableOptions,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            options: TableOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TableOptions {
        &mut self.options
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Append a column; a second column with the same name replaces the first
    pub fn add_column(&mut self, column: Column) {
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name() == column.name()) {
            *existing = column;
        } else {
            self.columns.push(column);
        }
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn primary(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.is_primary())
    }

    /// Add an index. At most one PRIMARY index may exist; adding a second one
    /// amends the existing index's column list instead.
    pub fn add_index(&mut self, index: Index) -> OrmResult<()> {
        if index.kind() == IndexKind::Primary {
            if let Some(primary) = self.indexes.iter_mut().find(|i| i.is_primary()) {
                primary.add_columns(index.columns());
                return Ok(());
            }
        } else if self.index(index.name()).is_some() {
            return Err(OrmError::Schema(format!(
                "duplicate index {} on table {}",
                index.name(),
                self.name
            )));
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Structural equality ignoring cosmetic differences: same column name
    /// set with pairwise-similar columns, and same index set.
    pub fn is_similar(&self, that: &Table) -> bool {
        if self.columns.len() != that.columns.len() || self.indexes.len() != that.indexes.len() {
            return false;
        }
        for column in &self.columns {
            match that.column(column.name()) {
                Some(other) if column.is_similar(other) => {}
                _ => return false,
            }
        }
        for index in &self.indexes {
            match that.index(index.name()) {
                Some(other) if index.is_similar(other) => {}
                _ => return false,
            }
        }
        true
    }

    /// Full statement set to create this table from nothing: CREATE TABLE,
    /// secondary index adds, then any `on create` actions.
    pub fn create_sql(&self, dialect: &dyn SqlDialect) -> Vec<String> {
        let mut statements = vec![dialect.create_table(self)];
        for index in &self.indexes {
            if !index.is_primary() {
                statements.push(dialect.alter_table_index_add(self, index));
            }
        }
        statements.extend(self.options.on_create.iter().cloned());
        statements
    }
}
