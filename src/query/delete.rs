//! DELETE builder

use crate::backend::Database;
use crate::error::OrmResult;
use crate::meta::ClassMeta;
use crate::value::DbValue;

use super::where_clause::WhereClause;

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    table: String,
    where_clause: WhereClause,
}

impl DeleteQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: WhereClause::new(),
        }
    }

    pub fn for_class(meta: &ClassMeta) -> Self {
        Self::new(meta.table().to_string())
    }

    pub fn filter(mut self, build: impl FnOnce(&mut WhereClause)) -> Self {
        build(&mut self.where_clause);
        self
    }

    pub fn to_sql(&self) -> (String, Vec<DbValue>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        let mut counter = 1;
        self.where_clause
            .render("WHERE", &mut sql, &mut params, &mut counter);
        (sql, params)
    }

    pub async fn execute(&self, db: &dyn Database) -> OrmResult<u64> {
        let (sql, params) = self.to_sql();
        db.execute(&sql, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_with_filter() {
        let query = DeleteQuery::new("locks").filter(|w| {
            w.is_null("pid").lt("used", DbValue::Int(100));
        });
        let (sql, params) = query.to_sql();
        assert_eq!(sql, "DELETE FROM locks WHERE pid IS NULL AND used < $1");
        assert_eq!(params, vec![DbValue::Int(100)]);
    }
}
