//! SELECT builder
//!
//! ORM-aware select queries: aliased expressions, joins (including
//! class-to-class link resolution), where/having, grouping, ordering,
//! pagination, and UNION chaining. Cross-database joins are validated
//! against backend capabilities before any SQL is generated.

use std::sync::Arc;

use crate::backend::{Capability, Database, SqlRow};
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::value::DbValue;

use super::types::{Join, JoinKind, OrderDirection};
use super::where_clause::WhereClause;

/// SELECT query builder
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    what: Vec<(String, String)>,
    table: String,
    alias: String,
    joins: Vec<Join>,
    where_clause: WhereClause,
    having: WhereClause,
    group_by: Vec<String>,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<i64>,
    offset: Option<i64>,
    distinct: bool,
    unions: Vec<SelectQuery>,
    meta: Option<Arc<ClassMeta>>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            alias: "X".to_string(),
            table,
            ..Default::default()
        }
    }

    /// Select all declared columns of a class under the default alias
    pub fn for_class(meta: Arc<ClassMeta>) -> Self {
        let mut query = Self::new(meta.table().to_string());
        for column in meta.columns() {
            query
                .what
                .push((column.to_string(), format!("X.{}", column)));
        }
        query.meta = Some(meta);
        query
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn meta(&self) -> Option<&Arc<ClassMeta>> {
        self.meta.as_ref()
    }

    /// Add one select expression under a result alias
    pub fn what(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.what.push((name.into(), expression.into()));
        self
    }

    pub fn clear_what(mut self) -> Self {
        self.what.clear();
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn where_mut(&mut self) -> &mut WhereClause {
        &mut self.where_clause
    }

    pub fn filter(mut self, build: impl FnOnce(&mut WhereClause)) -> Self {
        build(&mut self.where_clause);
        self
    }

    pub fn having(mut self, build: impl FnOnce(&mut WhereClause)) -> Self {
        build(&mut self.having);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Join another class's table, refusing cross-database joins unless both
    /// backends advertise the capability.
    pub fn join_class(
        mut self,
        source_db: &dyn Database,
        far_db: &dyn Database,
        far_meta: &ClassMeta,
        join: Join,
    ) -> OrmResult<Self> {
        if source_db.name() != far_db.name()
            && !(source_db.supports(Capability::CrossDatabaseQueries)
                && far_db.supports(Capability::CrossDatabaseQueries))
        {
            return Err(OrmError::Query(format!(
                "cross-database join from '{}' to '{}' is not supported",
                source_db.name(),
                far_db.name()
            )));
        }
        let mut join = join;
        join.table = far_meta.table().to_string();
        join.database = Some(far_db.name().to_string());
        self.joins.push(join);
        Ok(self)
    }

    /// Resolve the default traversal path from this query's class to `far`
    /// and add the corresponding join: a has_one member joins on this side's
    /// foreign key, a has_many joins on the far side's.
    pub fn link(self, far: &ClassMeta, alias: impl Into<String>) -> OrmResult<Self> {
        let meta = self
            .meta
            .clone()
            .ok_or_else(|| OrmError::Query("link() requires a class-bound query".to_string()))?;
        let alias = alias.into();
        let near_alias = self.alias.clone();

        if let Some((member, _)) = meta
            .has_one_members()
            .find(|(_, spec)| spec.class == far.name())
        {
            let far_id = far.id_column().ok_or_else(|| {
                OrmError::Query(format!("{}: linked class has no id column", far.name()))
            })?;
            let join = Join::new(JoinKind::Inner, far.table(), alias.clone()).on(
                format!("{}.{}", near_alias, member),
                format!("{}.{}", alias, far_id),
            );
            return Ok(self.join(join));
        }
        if let Some((_, spec)) = meta
            .has_many_members()
            .find(|(_, spec)| spec.class == far.name())
        {
            let near_id = meta.id_column().ok_or_else(|| {
                OrmError::Query(format!("{}: class has no id column", meta.name()))
            })?;
            let join = Join::new(JoinKind::Inner, far.table(), alias.clone()).on(
                format!("{}.{}", alias, spec.foreign_key),
                format!("{}.{}", near_alias, near_id),
            );
            return Ok(self.join(join));
        }
        Err(OrmError::Query(format!(
            "no relation path from {} to {}",
            meta.name(),
            far.name()
        )))
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Chain another select with UNION
    pub fn union(mut self, other: SelectQuery) -> Self {
        self.unions.push(other);
        self
    }

    fn build(&self, params: &mut Vec<DbValue>, counter: &mut usize) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.what.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<String> = self
                .what
                .iter()
                .map(|(name, expression)| {
                    if name == expression {
                        name.clone()
                    } else {
                        format!("{} AS {}", expression, name)
                    }
                })
                .collect();
            sql.push_str(&fields.join(", "));
        }
        sql.push_str(&format!(" FROM {} AS {}", self.table, self.alias));
        for join in &self.joins {
            sql.push_str(&format!(" {} {} AS {} ON ", join.kind, join.table, join.alias));
            for (i, (left, right)) in join.on.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(&format!("{} = {}", left, right));
            }
        }
        self.where_clause.render("WHERE", &mut sql, params, counter);
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        self.having.render("HAVING", &mut sql, params, counter);
        sql
    }

    /// Final SQL plus bound parameters
    pub fn to_sql(&self) -> (String, Vec<DbValue>) {
        let mut params = Vec::new();
        let mut counter = 1;
        let mut sql = self.build(&mut params, &mut counter);
        for union in &self.unions {
            sql.push_str(" UNION ");
            sql.push_str(&union.build(&mut params, &mut counter));
        }
        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        (sql, params)
    }

    pub async fn fetch_all(&self, db: &dyn Database) -> OrmResult<Vec<SqlRow>> {
        let (sql, params) = self.to_sql();
        db.fetch_all(&sql, &params).await
    }

    pub async fn fetch_optional(&self, db: &dyn Database) -> OrmResult<Option<SqlRow>> {
        let (sql, params) = self.to_sql();
        db.fetch_optional(&sql, &params).await
    }

    /// COUNT(*) over this query's where clause
    pub async fn count(&self, db: &dyn Database) -> OrmResult<i64> {
        let counting = self
            .clone()
            .clear_what()
            .what("total", "COUNT(*)".to_string());
        let (sql, params) = counting.to_sql();
        Ok(db.fetch_i64(&sql, &params).await?.unwrap_or(0))
    }
}
