//! Declarative schema definitions
//!
//! Model schemas are declared as JSON-shaped maps with keys `columns`,
//! `indexes`, `unique keys`, `primary keys`, `on create`, `engine`, `source`,
//! and converted here into physical `Table` definitions. Identifier
//! validation failures are logged and skipped; the legacy singular
//! `primary key` spelling is a hard syntax error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use sqlparser::dialect::PostgreSqlDialect as ParserDialect;
use sqlparser::parser::Parser;
use tracing::warn;

use crate::dialect::{LogicalType, SqlDialect};
use crate::error::{OrmError, OrmResult};
use crate::value::DbValue;

use super::column::Column;
use super::index::{Index, IndexKind};
use super::table::Table;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

fn valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Declared shape of one column
#[derive(Debug, Clone, Default)]
pub struct ColumnSpec {
    pub logical: Option<LogicalType>,
    /// Explicit SQL type, overriding the logical mapping
    pub sql_type: Option<String>,
    pub size: Option<u32>,
    pub not_null: bool,
    pub default: Option<DbValue>,
    pub previous_name: Option<String>,
    pub increment: Option<bool>,
    pub primary: bool,
}

/// A parsed declarative schema for one table
#[derive(Debug, Clone, Default)]
pub struct SchemaDefinition {
    pub columns: Vec<(String, ColumnSpec)>,
    pub indexes: Vec<(String, Vec<String>)>,
    pub unique_keys: Vec<(String, Vec<String>)>,
    pub primary_keys: Vec<String>,
    pub on_create: Vec<String>,
    pub engine: Option<String>,
    pub source: Option<String>,
}

impl SchemaDefinition {
    /// Parse the map form of a schema declaration
    pub fn from_json(value: &JsonValue) -> OrmResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| OrmError::Schema("schema definition must be a map".to_string()))?;

        let mut definition = SchemaDefinition::default();
        for (key, entry) in object {
            match key.as_str() {
                "columns" => definition.columns = parse_columns(entry)?,
                "indexes" => definition.indexes = parse_index_map(entry, "indexes")?,
                "unique keys" => definition.unique_keys = parse_index_map(entry, "unique keys")?,
                "primary keys" => definition.primary_keys = string_list(entry, "primary keys")?,
                "primary key" => {
                    return Err(OrmError::Schema(
                        "'primary key' is invalid; use 'primary keys'".to_string(),
                    ))
                }
                "on create" => definition.on_create = sql_list(entry)?,
                "engine" => definition.engine = entry.as_str().map(str::to_string),
                "source" => definition.source = entry.as_str().map(str::to_string),
                other => warn!(key = other, "unknown schema definition key, skipping"),
            }
        }
        Ok(definition)
    }

    /// Build the physical table this definition describes
    pub fn to_table(&self, table_name: &str, dialect: &dyn SqlDialect) -> OrmResult<Table> {
        if !valid_identifier(table_name) {
            return Err(OrmError::Schema(format!(
                "invalid table name '{}'",
                table_name
            )));
        }
        let mut table = Table::new(table_name);
        let mut primary_columns: Vec<String> = Vec::new();

        for (name, spec) in &self.columns {
            if !valid_identifier(name) {
                warn!(table = table_name, column = %name, "invalid column name, skipping");
                continue;
            }
            let sql_type = match (&spec.sql_type, spec.logical) {
                (Some(explicit), _) => explicit.clone(),
                (None, Some(logical)) => dialect.native_type(logical, spec.size),
                (None, None) => {
                    return Err(OrmError::Schema(format!(
                        "column '{}' declares no type",
                        name
                    )))
                }
            };
            let increment = spec
                .increment
                .unwrap_or(spec.logical == Some(LogicalType::Id));
            let mut column = Column::new(name.clone(), sql_type)
                .set_not_null(spec.not_null || increment)
                .set_increment(increment)
                .set_default(spec.default.clone());
            if let Some(previous) = &spec.previous_name {
                column = column.set_previous_name(previous.clone());
            }
            table.add_column(column);
            if spec.primary || spec.logical == Some(LogicalType::Id) {
                primary_columns.push(name.clone());
            }
        }

        for key in &self.primary_keys {
            if !table.has_column(key) {
                return Err(OrmError::Schema(format!(
                    "primary key '{}' is not a declared column",
                    key
                )));
            }
            if !primary_columns.contains(key) {
                primary_columns.push(key.clone());
            }
        }
        if !primary_columns.is_empty() {
            table.add_index(Index::primary(primary_columns))?;
        }

        for (name, columns) in &self.indexes {
            add_secondary_index(&mut table, name, columns, IndexKind::Index)?;
        }
        for (name, columns) in &self.unique_keys {
            add_secondary_index(&mut table, name, columns, IndexKind::Unique)?;
        }

        for sql in &self.on_create {
            Parser::parse_sql(&ParserDialect {}, sql)
                .map_err(|e| OrmError::Schema(format!("invalid 'on create' SQL: {}", e)))?;
        }
        table.options_mut().on_create = self.on_create.clone();
        table.options_mut().engine = self.engine.clone();
        table.options_mut().source = self.source.clone();
        Ok(table)
    }
}

fn add_secondary_index(
    table: &mut Table,
    name: &str,
    columns: &[String],
    kind: IndexKind,
) -> OrmResult<()> {
    if !valid_identifier(name) {
        warn!(table = table.name(), index = name, "invalid index name, skipping");
        return Ok(());
    }
    let known: Vec<String> = columns
        .iter()
        .filter(|c| {
            let present = table.has_column(c);
            if !present {
                warn!(table = table.name(), index = name, column = %c, "index references unknown column, skipping column");
            }
            present
        })
        .cloned()
        .collect();
    if known.is_empty() {
        return Ok(());
    }
    // Index literally named PRIMARY amends the primary key.
    if name == super::index::PRIMARY_INDEX_NAME {
        return table.add_index(Index::primary(known));
    }
    // Postgres index names are schema-global, so qualify with the table name.
    let qualified = if name.starts_with(table.name()) {
        name.to_string()
    } else {
        format!("{}_{}_idx", table.name(), name)
    };
    table.add_index(Index::new(qualified, kind, known))
}

fn parse_columns(value: &JsonValue) -> OrmResult<Vec<(String, ColumnSpec)>> {
    let object = value
        .as_object()
        .ok_or_else(|| OrmError::Schema("'columns' must be a map".to_string()))?;
    let mut columns = Vec::with_capacity(object.len());
    for (name, entry) in object {
        columns.push((name.clone(), parse_column_spec(name, entry)?));
    }
    Ok(columns)
}

fn parse_column_spec(name: &str, value: &JsonValue) -> OrmResult<ColumnSpec> {
    let mut spec = ColumnSpec::default();
    match value {
        JsonValue::String(type_name) => {
            spec.logical = Some(parse_logical_type(name, type_name)?);
        }
        JsonValue::Object(fields) => {
            for (field, field_value) in fields {
                match field.as_str() {
                    "type" => {
                        let type_name = field_value.as_str().ok_or_else(|| {
                            OrmError::Schema(format!("column '{}': 'type' must be a string", name))
                        })?;
                        spec.logical = Some(parse_logical_type(name, type_name)?);
                    }
                    "sql_type" => spec.sql_type = field_value.as_str().map(str::to_lowercase),
                    "size" => spec.size = field_value.as_u64().map(|v| v as u32),
                    "not null" | "required" => {
                        spec.not_null = field_value.as_bool().unwrap_or(false)
                    }
                    "default" => spec.default = Some(DbValue::from_json(field_value.clone())),
                    "previous_name" => {
                        spec.previous_name = field_value.as_str().map(str::to_string)
                    }
                    "increment" => spec.increment = field_value.as_bool(),
                    "primary" => spec.primary = field_value.as_bool().unwrap_or(false),
                    other => {
                        warn!(column = name, field = other, "unknown column field, skipping")
                    }
                }
            }
        }
        _ => {
            return Err(OrmError::Schema(format!(
                "column '{}' must be a type name or a map",
                name
            )))
        }
    }
    Ok(spec)
}

fn parse_logical_type(column: &str, type_name: &str) -> OrmResult<LogicalType> {
    match type_name.to_lowercase().as_str() {
        "id" => Ok(LogicalType::Id),
        "integer" | "int" => Ok(LogicalType::Integer),
        "double" | "real" | "float" => Ok(LogicalType::Double),
        "string" | "text" => Ok(LogicalType::Text),
        "boolean" | "bool" => Ok(LogicalType::Boolean),
        "timestamp" | "datetime" => Ok(LogicalType::Timestamp),
        "json" => Ok(LogicalType::Json),
        "uuid" => Ok(LogicalType::Uuid),
        other => Err(OrmError::Schema(format!(
            "column '{}': unknown type '{}'",
            column, other
        ))),
    }
}

fn parse_index_map(value: &JsonValue, context: &str) -> OrmResult<Vec<(String, Vec<String>)>> {
    let object = value
        .as_object()
        .ok_or_else(|| OrmError::Schema(format!("'{}' must be a map", context)))?;
    let mut indexes = Vec::with_capacity(object.len());
    for (name, columns) in object {
        indexes.push((name.clone(), string_list(columns, context)?));
    }
    Ok(indexes)
}

fn string_list(value: &JsonValue, context: &str) -> OrmResult<Vec<String>> {
    match value {
        JsonValue::String(s) => Ok(vec![s.clone()]),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    OrmError::Schema(format!("'{}' entries must be strings", context))
                })
            })
            .collect(),
        _ => Err(OrmError::Schema(format!(
            "'{}' must be a string or list",
            context
        ))),
    }
}

fn sql_list(value: &JsonValue) -> OrmResult<Vec<String>> {
    string_list(value, "on create")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use serde_json::json;

    fn parse(value: JsonValue) -> OrmResult<SchemaDefinition> {
        SchemaDefinition::from_json(&value)
    }

    #[test]
    fn singular_primary_key_is_a_syntax_error() {
        let err = parse(json!({
            "columns": {"id": "id"},
            "primary key": ["id"],
        }))
        .unwrap_err();
        assert!(err.to_string().contains("primary keys"));
    }

    #[test]
    fn id_column_implies_primary_and_increment() {
        let definition = parse(json!({
            "columns": {"id": "id", "name": "string"},
        }))
        .unwrap();
        let table = definition.to_table("users", &PostgresDialect).unwrap();
        let id = table.column("id").unwrap();
        assert!(id.is_increment());
        assert_eq!(table.primary().unwrap().columns(), ["id"]);
    }

    #[test]
    fn invalid_column_name_is_skipped_not_fatal() {
        let definition = parse(json!({
            "columns": {"id": "id", "bad name!": "string"},
        }))
        .unwrap();
        let table = definition.to_table("users", &PostgresDialect).unwrap();
        assert_eq!(table.columns().len(), 1);
    }

    #[test]
    fn unique_keys_become_unique_indexes() {
        let definition = parse(json!({
            "columns": {"id": "id", "email": {"type": "string", "size": 128, "not null": true}},
            "unique keys": {"email": ["email"]},
        }))
        .unwrap();
        let table = definition.to_table("users", &PostgresDialect).unwrap();
        let index = table.index("users_email_idx").unwrap();
        assert_eq!(index.kind(), IndexKind::Unique);
        assert_eq!(
            table.column("email").unwrap().sql_type(),
            "varchar(128)"
        );
    }

    #[test]
    fn secondary_index_names_are_table_qualified() {
        let definition = parse(json!({
            "columns": {"id": "id", "server": {"type": "integer"}},
            "indexes": {"server": ["server"]},
        }))
        .unwrap();
        let table = definition.to_table("locks", &PostgresDialect).unwrap();
        assert!(table.index("locks_server_idx").is_some());
        assert!(table.index("server").is_none());
    }

    #[test]
    fn on_create_sql_is_validated() {
        let definition = parse(json!({
            "columns": {"id": "id"},
            "on create": "THIS IS NOT SQL AT ALL (",
        }))
        .unwrap();
        let err = definition.to_table("users", &PostgresDialect).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }

    #[test]
    fn previous_name_is_carried_to_the_column() {
        let definition = parse(json!({
            "columns": {
                "id": "id",
                "full_name": {"type": "string", "previous_name": "name"},
            },
        }))
        .unwrap();
        let table = definition.to_table("users", &PostgresDialect).unwrap();
        assert_eq!(
            table.column("full_name").unwrap().previous_name(),
            Some("name")
        );
    }
}
