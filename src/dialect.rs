//! SQL dialect seam
//!
//! All DDL and dialect-specific SQL is generated behind `SqlDialect`; the
//! schema diff engine itself never formats SQL. The shipped implementation
//! targets PostgreSQL.

use crate::schema::{Column, Index, IndexKind, Table};

/// Logical column types accepted by the declarative schema DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// Auto-incrementing integer primary key
    Id,
    Integer,
    Double,
    Text,
    Boolean,
    Timestamp,
    Json,
    Uuid,
}

/// Dialect-specific SQL generation
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Native type for a logical DSL type; `size` applies to sized text
    fn native_type(&self, logical: LogicalType, size: Option<u32>) -> String;

    /// Column clause as used inside CREATE TABLE / ADD COLUMN
    fn column_definition(&self, column: &Column) -> String;

    fn create_table(&self, table: &Table) -> String;

    /// `after` is a positioning hint for dialects with positional ADD COLUMN;
    /// dialects without it ignore the hint.
    fn alter_table_column_add(&self, table: &Table, column: &Column, after: Option<&str>)
        -> String;

    fn alter_table_column_drop(&self, table: &Table, column_name: &str) -> String;

    /// In-place column change, possibly several statements (rename, retype,
    /// nullability, default).
    fn alter_table_change_column(&self, table: &Table, old: &Column, new: &Column) -> Vec<String>;

    fn alter_table_index_add(&self, table: &Table, index: &Index) -> String;

    fn alter_table_index_drop(&self, table: &Table, index: &Index) -> String;

    fn table_as(&self, table: &str, alias: &str) -> String {
        format!("{} AS {}", table, alias)
    }

    fn now(&self) -> &'static str;
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn native_type(&self, logical: LogicalType, size: Option<u32>) -> String {
        match logical {
            LogicalType::Id => "bigint".to_string(),
            LogicalType::Integer => "bigint".to_string(),
            LogicalType::Double => "double precision".to_string(),
            LogicalType::Text => match size {
                Some(len) => format!("varchar({})", len),
                None => "text".to_string(),
            },
            LogicalType::Boolean => "boolean".to_string(),
            LogicalType::Timestamp => "timestamp with time zone".to_string(),
            LogicalType::Json => "jsonb".to_string(),
            LogicalType::Uuid => "uuid".to_string(),
        }
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut def = if column.is_increment() {
            format!("{} BIGSERIAL", column.name())
        } else {
            format!("{} {}", column.name(), column.sql_type().to_uppercase())
        };
        if column.not_null() {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = column.default_value() {
            def.push_str(&format!(" DEFAULT {}", default.to_sql_literal()));
        }
        def
    }

    fn create_table(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table
            .columns()
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        if let Some(primary) = table.primary() {
            parts.push(format!("PRIMARY KEY ({})", primary.columns().join(", ")));
        }
        format!("CREATE TABLE {} (\n    {}\n)", table.name(), parts.join(",\n    "))
    }

    fn alter_table_column_add(
        &self,
        table: &Table,
        column: &Column,
        _after: Option<&str>,
    ) -> String {
        // Postgres has no positional ADD COLUMN; the hint is dropped.
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            table.name(),
            self.column_definition(column)
        )
    }

    fn alter_table_column_drop(&self, table: &Table, column_name: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {}", table.name(), column_name)
    }

    fn alter_table_change_column(&self, table: &Table, old: &Column, new: &Column) -> Vec<String> {
        let mut statements = Vec::new();
        if old.name() != new.name() {
            statements.push(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table.name(),
                old.name(),
                new.name()
            ));
        }
        if old.sql_type() != new.sql_type() && !new.is_increment() {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                table.name(),
                new.name(),
                new.sql_type().to_uppercase(),
                new.name(),
                new.sql_type()
            ));
        }
        if old.not_null() != new.not_null() {
            let action = if new.not_null() { "SET" } else { "DROP" };
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                table.name(),
                new.name(),
                action
            ));
        }
        if old.default_value() != new.default_value() {
            let clause = match new.default_value() {
                Some(default) => format!("SET DEFAULT {}", default.to_sql_literal()),
                None => "DROP DEFAULT".to_string(),
            };
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                table.name(),
                new.name(),
                clause
            ));
        }
        statements
    }

    fn alter_table_index_add(&self, table: &Table, index: &Index) -> String {
        match index.kind() {
            IndexKind::Primary => format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                table.name(),
                index.columns().join(", ")
            ),
            IndexKind::Unique => format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                index.name(),
                table.name(),
                index.columns().join(", ")
            ),
            IndexKind::Index => format!(
                "CREATE INDEX {} ON {} ({})",
                index.name(),
                table.name(),
                index.columns().join(", ")
            ),
        }
    }

    fn alter_table_index_drop(&self, table: &Table, index: &Index) -> String {
        match index.kind() {
            IndexKind::Primary => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}_pkey",
                table.name(),
                table.name()
            ),
            _ => format!("DROP INDEX IF EXISTS {}", index.name()),
        }
    }

    fn now(&self) -> &'static str {
        "now()"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DbValue;

    #[test]
    fn column_definition_with_default() {
        let column = Column::new("state", "text")
            .set_not_null(true)
            .set_default(Some(DbValue::Text("new".to_string())));
        assert_eq!(
            PostgresDialect.column_definition(&column),
            "state TEXT NOT NULL DEFAULT 'new'"
        );
    }

    #[test]
    fn change_column_renames_first() {
        let table = Table::new("users");
        let old = Column::new("name", "text");
        let new = Column::new("full_name", "varchar(128)");
        let statements = PostgresDialect.alter_table_change_column(&table, &old, &new);
        assert!(statements[0].contains("RENAME COLUMN name TO full_name"));
        assert!(statements[1].contains("ALTER COLUMN full_name TYPE VARCHAR(128)"));
    }

    #[test]
    fn increment_column_uses_serial() {
        let column = Column::new("id", "bigint").set_increment(true).set_not_null(true);
        assert_eq!(
            PostgresDialect.column_definition(&column),
            "id BIGSERIAL NOT NULL"
        );
    }
}
