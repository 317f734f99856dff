//! INSERT builder
//!
//! Plain inserts, upserts (the REPLACE-style "insert or update on conflict"),
//! and insert-from-select. When the backend supports RETURNING, the generated
//! key comes back from `execute_returning_id`.

use crate::backend::{Capability, Database};
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::value::DbValue;

use super::edit::EditCore;
use super::select::SelectQuery;

#[derive(Debug, Clone)]
enum InsertMode {
    Plain,
    /// Update the named columns when the conflict target matches
    Upsert { conflict: Vec<String> },
    FromSelect { columns: Vec<String>, select: SelectQuery },
}

/// INSERT query builder
#[derive(Debug, Clone)]
pub struct InsertQuery {
    core: EditCore,
    mode: InsertMode,
    returning: Option<String>,
}

impl InsertQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            core: EditCore::new(table),
            mode: InsertMode::Plain,
            returning: None,
        }
    }

    pub fn for_class(meta: &ClassMeta) -> Self {
        let mut query = Self {
            core: EditCore::for_class(meta),
            mode: InsertMode::Plain,
            returning: None,
        };
        if let Some(auto) = meta.auto_column() {
            query.returning = Some(auto.to_string());
        }
        query
    }

    pub fn core_mut(&mut self) -> &mut EditCore {
        &mut self.core
    }

    pub fn value(mut self, column: &str, value: impl Into<DbValue>) -> OrmResult<Self> {
        self.core.value(column, value)?;
        Ok(self)
    }

    pub fn set_values(
        mut self,
        pairs: impl IntoIterator<Item = (String, DbValue)>,
    ) -> OrmResult<Self> {
        self.core.set_values(pairs)?;
        Ok(self)
    }

    /// Insert-or-update on the given conflict columns
    pub fn upsert(mut self, conflict: Vec<String>) -> Self {
        self.mode = InsertMode::Upsert { conflict };
        self
    }

    /// Populate from a select instead of literal values
    pub fn from_select(mut self, columns: Vec<String>, select: SelectQuery) -> Self {
        self.mode = InsertMode::FromSelect { columns, select };
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    pub fn to_sql(&self) -> OrmResult<(String, Vec<DbValue>)> {
        let mut sql = format!("INSERT INTO {}", self.core.table());
        let mut params = Vec::new();

        match &self.mode {
            InsertMode::FromSelect { columns, select } => {
                sql.push_str(&format!(" ({}) ", columns.join(", ")));
                let (select_sql, select_params) = select.to_sql();
                sql.push_str(&select_sql);
                params = select_params;
            }
            InsertMode::Plain | InsertMode::Upsert { .. } => {
                if self.core.is_empty() {
                    return Err(OrmError::Query("insert with no values".to_string()));
                }
                let columns: Vec<&str> =
                    self.core.values().iter().map(|(c, _)| c.as_str()).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|i| format!("${}", i)).collect();
                sql.push_str(&format!(
                    " ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders.join(", ")
                ));
                params = self
                    .core
                    .values()
                    .iter()
                    .map(|(_, v)| v.clone())
                    .collect();
                if let InsertMode::Upsert { conflict } = &self.mode {
                    let updates: Vec<String> = columns
                        .iter()
                        .filter(|c| !conflict.contains(&c.to_string()))
                        .map(|c| format!("{} = EXCLUDED.{}", c, c))
                        .collect();
                    sql.push_str(&format!(
                        " ON CONFLICT ({}) DO UPDATE SET {}",
                        conflict.join(", "),
                        updates.join(", ")
                    ));
                }
            }
        }
        if let Some(returning) = &self.returning {
            sql.push_str(&format!(" RETURNING {}", returning));
        }
        Ok((sql, params))
    }

    /// Execute without caring about the generated key
    pub async fn execute(&self, db: &dyn Database) -> OrmResult<u64> {
        let query = Self {
            core: self.core.clone(),
            mode: self.mode.clone(),
            returning: None,
        };
        let (sql, params) = query.to_sql()?;
        db.execute(&sql, &params).await
    }

    /// Execute and hand back the generated key
    pub async fn execute_returning_id(&self, db: &dyn Database) -> OrmResult<i64> {
        if !db.supports(Capability::InsertReturning) {
            return Err(OrmError::Query(format!(
                "database '{}' cannot return generated keys",
                db.name()
            )));
        }
        let returning = self
            .returning
            .as_deref()
            .ok_or_else(|| OrmError::Query("no returning column configured".to_string()))?;
        let (sql, params) = self.to_sql()?;
        let row = db
            .fetch_optional(&sql, &params)
            .await?
            .ok_or_else(|| OrmError::Database("insert returned no row".to_string()))?;
        row.get_i64(returning)
            .ok_or_else(|| OrmError::Database("insert returned no id".to_string()))
    }
}
