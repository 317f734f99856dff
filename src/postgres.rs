//! PostgreSQL backend
//!
//! `PostgresDatabase` implements the `Database` seam over an sqlx connection
//! pool. Live table structure is read from `information_schema` and the
//! `pg_index` catalogs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as _, Row, TypeInfo};

use crate::backend::{Capability, Database, SqlRow};
use crate::config::DatabaseConfig;
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{OrmError, OrmResult};
use crate::schema::{Column, Index, IndexKind, Table};
use crate::value::DbValue;

/// PostgreSQL implementation of the `Database` seam
pub struct PostgresDatabase {
    name: String,
    pool: PgPool,
    dialect: PostgresDialect,
}

impl PostgresDatabase {
    /// Open a pool per the configuration
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_secs))
            .test_before_acquire(config.pool.test_before_acquire);
        if let Some(idle) = config.pool.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle));
        }
        if let Some(lifetime) = config.pool.max_lifetime_secs {
            options = options.max_lifetime(Duration::from_secs(lifetime));
        }
        let pool = options.connect(&config.url).await?;
        Ok(Self {
            name: config.name.clone(),
            pool,
            dialect: PostgresDialect,
        })
    }

    pub fn from_pool(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
            dialect: PostgresDialect,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_params<'q>(
    sql: &'q str,
    params: &'q [DbValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            DbValue::Null => query.bind(Option::<String>::None),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Int(i) => query.bind(*i),
            DbValue::Float(f) => query.bind(*f),
            DbValue::Text(s) => query.bind(s.as_str()),
            DbValue::Bytes(b) => query.bind(b.as_slice()),
            DbValue::Uuid(u) => query.bind(*u),
            DbValue::Timestamp(ts) => query.bind(*ts),
            DbValue::Json(j) => query.bind(j),
        };
    }
    query
}

fn convert_row(row: &PgRow) -> OrmResult<SqlRow> {
    let mut values = HashMap::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(DbValue::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)?
                .map(|v| DbValue::Int(v as i64)),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)?
                .map(|v| DbValue::Int(v as i64)),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(DbValue::Int),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)?
                .map(|v| DbValue::Float(v as f64)),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(DbValue::Float),
            "UUID" => row.try_get::<Option<uuid::Uuid>, _>(i)?.map(DbValue::Uuid),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(DbValue::Timestamp),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|naive| DbValue::Timestamp(naive.and_utc())),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(i)?
                .map(DbValue::Json),
            "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i)?.map(DbValue::Bytes),
            _ => row.try_get::<Option<String>, _>(i)?.map(DbValue::Text),
        };
        values.insert(name, value.unwrap_or(DbValue::Null));
    }
    Ok(SqlRow::new(values))
}

#[async_trait]
impl Database for PostgresDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::CrossDatabaseQueries => false,
            Capability::InsertReturning => true,
        }
    }

    async fn execute(&self, sql: &str, params: &[DbValue]) -> OrmResult<u64> {
        let result = bind_params(sql, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DbValue]) -> OrmResult<Vec<SqlRow>> {
        let rows = bind_params(sql, params).fetch_all(&self.pool).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn fetch_optional(&self, sql: &str, params: &[DbValue]) -> OrmResult<Option<SqlRow>> {
        let row = bind_params(sql, params).fetch_optional(&self.pool).await?;
        row.as_ref().map(convert_row).transpose()
    }

    async fn table_definition(&self, table_name: &str) -> OrmResult<Table> {
        let column_rows = self
            .fetch_all(
                "SELECT column_name, data_type, is_nullable, column_default, \
                        character_maximum_length \
                 FROM information_schema.columns \
                 WHERE table_name = $1 AND table_schema = current_schema() \
                 ORDER BY ordinal_position",
                &[DbValue::Text(table_name.to_string())],
            )
            .await?;
        if column_rows.is_empty() {
            return Err(OrmError::TableNotFound(table_name.to_string()));
        }

        let mut table = Table::new(table_name);
        for row in &column_rows {
            let name = row
                .get_str("column_name")
                .ok_or_else(|| OrmError::Schema("missing column_name".to_string()))?
                .to_string();
            let mut sql_type = row.get_str("data_type").unwrap_or("text").to_string();
            if sql_type == "character varying" {
                sql_type = match row.get_i64("character_maximum_length") {
                    Some(len) => format!("varchar({})", len),
                    None => "text".to_string(),
                };
            }
            let default_raw = row.get_str("column_default");
            let increment = default_raw.map_or(false, |d| d.starts_with("nextval("));
            let mut column = Column::new(name, sql_type)
                .set_not_null(row.get_str("is_nullable") == Some("NO"))
                .set_increment(increment);
            if !increment {
                column = column.set_default(default_raw.map(parse_pg_default));
            }
            table.add_column(column);
        }

        let index_rows = self
            .fetch_all(
                "SELECT i.relname AS index_name, ix.indisunique AS is_unique, \
                        ix.indisprimary AS is_primary, a.attname AS column_name \
                 FROM pg_class t \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE t.relname = $1 \
                 ORDER BY i.relname, array_position(ix.indkey, a.attnum)",
                &[DbValue::Text(table_name.to_string())],
            )
            .await?;
        let mut grouped: Vec<(String, IndexKind, Vec<String>)> = Vec::new();
        for row in &index_rows {
            let index_name = row.get_str("index_name").unwrap_or_default().to_string();
            let kind = if row.get("is_primary").and_then(DbValue::as_bool) == Some(true) {
                IndexKind::Primary
            } else if row.get("is_unique").and_then(DbValue::as_bool) == Some(true) {
                IndexKind::Unique
            } else {
                IndexKind::Index
            };
            let column = row.get_str("column_name").unwrap_or_default().to_string();
            match grouped.iter_mut().find(|(name, _, _)| *name == index_name) {
                Some((_, _, columns)) => columns.push(column),
                None => grouped.push((index_name, kind, vec![column])),
            }
        }
        for (name, kind, columns) in grouped {
            table.add_index(Index::new(name, kind, columns))?;
        }
        Ok(table)
    }
}

/// Strip the cast Postgres appends to stored defaults ("'new'::text" → 'new')
fn parse_pg_default(raw: &str) -> DbValue {
    let stripped = raw.split("::").next().unwrap_or(raw).trim();
    if let Ok(i) = stripped.parse::<i64>() {
        return DbValue::Int(i);
    }
    if let Ok(f) = stripped.parse::<f64>() {
        return DbValue::Float(f);
    }
    match stripped {
        "true" => DbValue::Bool(true),
        "false" => DbValue::Bool(false),
        _ => {
            let unquoted = stripped.trim_matches('\'');
            DbValue::Text(unquoted.replace("''", "'"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parsing_strips_casts() {
        assert_eq!(parse_pg_default("'new'::text"), DbValue::Text("new".into()));
        assert_eq!(parse_pg_default("0"), DbValue::Int(0));
        assert_eq!(parse_pg_default("true"), DbValue::Bool(true));
    }
}
