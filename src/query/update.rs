//! UPDATE builder

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::value::DbValue;

use super::edit::EditCore;
use super::where_clause::WhereClause;

/// UPDATE query builder; `execute` reports affected rows
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    core: EditCore,
    where_clause: WhereClause,
}

impl UpdateQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            core: EditCore::new(table),
            where_clause: WhereClause::new(),
        }
    }

    pub fn for_class(meta: &ClassMeta) -> Self {
        Self {
            core: EditCore::for_class(meta),
            where_clause: WhereClause::new(),
        }
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

    pub fn filter(mut self, build: impl FnOnce(&mut WhereClause)) -> Self {
        build(&mut self.where_clause);
        self
    }

    pub fn to_sql(&self) -> OrmResult<(String, Vec<DbValue>)> {
        if self.core.is_empty() {
            return Err(OrmError::Query("update with no values".to_string()));
        }
        let mut sql = format!("UPDATE {} SET ", self.core.table());
        let mut params = Vec::new();
        let mut counter = 1;
        for (i, (column, value)) in self.core.values().iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            if value.is_null() {
                sql.push_str(&format!("{} = NULL", column));
            } else {
                sql.push_str(&format!("{} = ${}", column, counter));
                params.push(value.clone());
                counter += 1;
            }
        }
        self.where_clause
            .render("WHERE", &mut sql, &mut params, &mut counter);
        Ok((sql, params))
    }

    /// Execute, returning the affected-row count
    pub async fn execute(&self, db: &dyn Database) -> OrmResult<u64> {
        let (sql, params) = self.to_sql()?;
        db.execute(&sql, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, ColumnType};

    #[test]
    fn null_assignments_render_inline() {
        let meta = ClassMeta::new("Lock", "locks")
            .with_id("id")
            .with_column("pid", ColumnType::Integer)
            .with_column("code", ColumnType::Text);
        let query = UpdateQuery::for_class(&meta)
            .value("pid", DbValue::Null)
            .unwrap()
            .value("code", "x")
            .unwrap()
            .filter(|w| {
                w.eq("id", 9);
            });
        let (sql, params) = query.to_sql().unwrap();
        assert_eq!(sql, "UPDATE locks SET pid = NULL, code = $1 WHERE id = $2");
        assert_eq!(params, vec![DbValue::Text("x".into()), DbValue::Int(9)]);
    }

    #[test]
    fn update_without_values_is_an_error() {
        let err = UpdateQuery::new("locks").to_sql().unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }
}
