//! Schema synchronization
//!
//! Diffs a live table definition against a declared one and produces the
//! ordered SQL that brings the live table in line. Rename detection runs
//! before the generic add/drop pass so a `previous_name` hint yields a single
//! change statement instead of a drop+add pair. In-place changes that fail at
//! execution time fall back to a pre-computed drop+add for that column; the
//! fallback loses column data by design and is logged loudly.

use tracing::{debug, warn};

use crate::backend::Database;
use crate::dialect::SqlDialect;
use crate::error::OrmResult;

use super::definition::SchemaDefinition;
use super::table::Table;

/// Ordered, keyed statement lists produced by a table diff.
///
/// `changes` execute first; a change that succeeds removes the same key from
/// `drops` and `adds`, which otherwise run afterwards as the fallback plan.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Vec<(String, Vec<String>)>,
    drops: Vec<(String, Vec<String>)>,
    adds: Vec<(String, Vec<String>)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.drops.is_empty() && self.adds.is_empty()
    }

    fn push_change(&mut self, key: impl Into<String>, statements: Vec<String>) {
        if !statements.is_empty() {
            self.changes.push((key.into(), statements));
        }
    }

    fn prepend_change(&mut self, key: impl Into<String>, statements: Vec<String>) {
        if !statements.is_empty() {
            self.changes.insert(0, (key.into(), statements));
        }
    }

    fn push_drop(&mut self, key: impl Into<String>, statements: Vec<String>) {
        self.drops.push((key.into(), statements));
    }

    fn push_add(&mut self, key: impl Into<String>, statements: Vec<String>) {
        self.adds.push((key.into(), statements));
    }

    fn discard_fallback(&mut self, key: &str) {
        self.drops.retain(|(k, _)| k != key);
        self.adds.retain(|(k, _)| k != key);
    }

    /// Full statement list in execution order (dry-run view)
    pub fn statements(&self) -> Vec<String> {
        self.changes
            .iter()
            .chain(self.drops.iter())
            .chain(self.adds.iter())
            .flat_map(|(_, statements)| statements.iter().cloned())
            .collect()
    }
}

/// Compute the change set transforming `old` into `new`
pub fn diff(old: &Table, new: &Table, dialect: &dyn SqlDialect) -> ChangeSet {
    let mut set = ChangeSet::default();
    if new.is_similar(old) {
        debug!(table = old.name(), "tables are similar, nothing to do");
        return set;
    }
    debug!(table = old.name(), "tables differ");

    // Deterministic order: declared columns first, then old-only leftovers.
    let mut names: Vec<String> = new.column_names().iter().map(|s| s.to_string()).collect();
    for name in old.column_names() {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    let mut ignore_columns: Vec<String> = Vec::new();
    let mut ignore_indexes: Vec<String> = Vec::new();

    // Rename pass. Must run before the generic pass so a renamed column does
    // not turn into a spurious drop+add.
    for name in &names {
        if ignore_columns.contains(name) {
            continue;
        }
        let col_old = old.column(name);
        let col_new = new.column(name);
        match (col_old, col_new) {
            (None, Some(new_col)) => {
                if let Some(previous) = new_col.previous_name() {
                    if let Some(renamed_from) = old.column(previous) {
                        set.push_change(
                            name.clone(),
                            dialect.alter_table_change_column(new, renamed_from, new_col),
                        );
                        ignore_columns.push(previous.to_string());
                        ignore_columns.push(name.clone());
                    }
                }
            }
            (Some(old_col), Some(new_col)) if !old_col.is_similar(new_col) => {
                // The new column replaces a differently-named old one while a
                // column also exists under the new name: drop the obstruction,
                // then change the hinted column into place.
                if let Some(previous) = new_col.previous_name() {
                    if let Some(renamed_from) = old.column(previous) {
                        set.push_change(
                            previous.to_string(),
                            vec![dialect.alter_table_column_drop(new, old_col.name())],
                        );
                        set.push_change(
                            name.clone(),
                            dialect.alter_table_change_column(new, renamed_from, new_col),
                        );
                        ignore_columns.push(previous.to_string());
                        ignore_columns.push(name.clone());
                    }
                }
            }
            _ => {}
        }
    }

    // Generic pass: change / drop / add for everything not consumed above.
    let mut last_column: Option<String> = None;
    for name in &names {
        if ignore_columns.contains(name) {
            continue;
        }
        let col_old = old.column(name);
        let col_new = new.column(name);
        match (col_old, col_new) {
            (Some(old_col), Some(new_col)) => {
                if !old_col.is_similar(new_col) {
                    set.push_change(
                        name.clone(),
                        dialect.alter_table_change_column(new, old_col, new_col),
                    );
                    if new_col.is_increment() {
                        if let Some(primary) = new.primary() {
                            if primary.columns().contains(name) {
                                ignore_indexes.push(primary.name().to_string());
                            }
                        }
                    }
                    set.push_drop(
                        name.clone(),
                        vec![dialect.alter_table_column_drop(new, old_col.name())],
                    );
                    set.push_add(
                        name.clone(),
                        vec![dialect.alter_table_column_add(new, new_col, last_column.as_deref())],
                    );
                }
            }
            (Some(old_col), None) => {
                set.push_drop(
                    name.clone(),
                    vec![dialect.alter_table_column_drop(new, old_col.name())],
                );
                if let Some(remove_sql) = old.options().remove_sql.get(name) {
                    set.push_drop(format!("-{}", name), vec![remove_sql.clone()]);
                }
            }
            (None, Some(new_col)) => {
                set.push_add(
                    name.clone(),
                    vec![dialect.alter_table_column_add(new, new_col, last_column.as_deref())],
                );
                if let Some(add_sql) = new_col.extra("add_sql") {
                    set.push_add(format!("+{}", name), vec![add_sql.to_string()]);
                }
            }
            (None, None) => {}
        }
        last_column = Some(name.clone());
    }

    // Index pass. Drops are prepended so they run before any column change
    // that would invalidate them.
    for index_old in old.indexes() {
        if ignore_indexes.contains(&index_old.name().to_string()) {
            continue;
        }
        match new.index(index_old.name()) {
            Some(index_new) => {
                if !index_old.is_similar(index_new) {
                    set.prepend_change(
                        format!("index_{}", index_old.name()),
                        vec![dialect.alter_table_index_drop(old, index_old)],
                    );
                    set.push_add(
                        format!("index_{}", index_old.name()),
                        vec![dialect.alter_table_index_add(new, index_new)],
                    );
                }
            }
            None => {
                set.prepend_change(
                    format!("index_{}", index_old.name()),
                    vec![dialect.alter_table_index_drop(old, index_old)],
                );
            }
        }
    }
    for index_new in new.indexes() {
        if ignore_indexes.contains(&index_new.name().to_string()) {
            continue;
        }
        if old.index(index_new.name()).is_none() {
            set.push_add(
                format!("index_{}", index_new.name()),
                vec![dialect.alter_table_index_add(new, index_new)],
            );
        }
    }

    set
}

/// Compute and (optionally) apply the SQL bringing `old` in line with `new`.
///
/// The returned statement list is identical whether or not `apply` is set;
/// dry-run and apply share one code path. Per-statement failures never abort
/// the batch: a failed in-place change leaves its drop+add fallback live,
/// which runs in the following phases and loses that column's data.
pub async fn update(
    db: &dyn Database,
    old: &Table,
    new: &Table,
    apply: bool,
) -> OrmResult<Vec<String>> {
    let mut set = diff(old, new, db.dialect());
    let mut sql_list: Vec<String> = Vec::new();

    let changes = std::mem::take(&mut set.changes);
    for (key, statements) in changes {
        sql_list.extend(statements.iter().cloned());
        let mut success = true;
        if apply {
            for sql in &statements {
                if let Err(error) = db.execute(sql, &[]).await {
                    warn!(table = new.name(), key = %key, %error, %sql,
                        "in-place change failed, falling back to drop+add");
                    success = false;
                    break;
                }
            }
        }
        if success {
            set.discard_fallback(&key);
        }
    }

    for (key, statements) in set.drops.iter().chain(set.adds.iter()) {
        sql_list.extend(statements.iter().cloned());
        if apply {
            for sql in statements {
                if let Err(error) = db.execute(sql, &[]).await {
                    warn!(table = new.name(), key = %key, %error, %sql, "schema statement failed");
                }
            }
        }
    }

    Ok(sql_list)
}

/// Bring the live table matching `table` up to date, creating it when absent
pub async fn synchronize(db: &dyn Database, table: &Table, apply: bool) -> OrmResult<Vec<String>> {
    match db.table_definition(table.name()).await {
        Ok(old) => update(db, &old, table, apply).await,
        Err(error) if error.is_table_not_found() => {
            let statements = table.create_sql(db.dialect());
            if apply {
                for sql in &statements {
                    db.execute(sql, &[]).await?;
                }
            }
            Ok(statements)
        }
        Err(error) => Err(error),
    }
}

/// Synchronize a declarative schema definition by name
pub async fn synchronize_definition(
    db: &dyn Database,
    table_name: &str,
    definition: &SchemaDefinition,
    apply: bool,
) -> OrmResult<Vec<String>> {
    let table = definition.to_table(table_name, db.dialect())?;
    synchronize(db, &table, apply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::schema::{Column, Index, IndexKind};
    use crate::testing::MockDatabase;

    fn base_table() -> Table {
        let mut table = Table::new("people");
        table.add_column(Column::new("id", "bigint").set_not_null(true).set_increment(true));
        table.add_column(Column::new("name", "text"));
        table
            .add_index(Index::primary(vec!["id".to_string()]))
            .unwrap();
        table
    }

    #[test]
    fn identical_tables_diff_to_nothing() {
        let table = base_table();
        let set = diff(&table, &table.clone(), &PostgresDialect);
        assert!(set.is_empty());
        assert!(set.statements().is_empty());
    }

    #[test]
    fn rename_hint_yields_single_change_not_drop_add() {
        let old = base_table();
        let mut new = Table::new("people");
        new.add_column(Column::new("id", "bigint").set_not_null(true).set_increment(true));
        new.add_column(Column::new("full_name", "text").set_previous_name("name"));
        new.add_index(Index::primary(vec!["id".to_string()])).unwrap();

        let statements = diff(&old, &new, &PostgresDialect).statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("RENAME COLUMN name TO full_name"));
    }

    #[test]
    fn added_column_is_a_single_add() {
        let old = base_table();
        let mut new = base_table();
        new.add_column(Column::new("email", "text").set_not_null(true));

        let statements = diff(&old, &new, &PostgresDialect).statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("ADD COLUMN email TEXT NOT NULL"));
    }

    #[test]
    fn removed_column_is_dropped_with_remove_sql_hook() {
        let mut old = base_table();
        old.add_column(Column::new("legacy", "text"));
        old.options_mut().remove_sql.insert(
            "legacy".to_string(),
            "DELETE FROM audit WHERE source = 'legacy'".to_string(),
        );
        let new = base_table();

        let statements = diff(&old, &new, &PostgresDialect).statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("DROP COLUMN legacy"));
        assert!(statements[1].starts_with("DELETE FROM audit"));
    }

    #[test]
    fn changed_index_drop_precedes_column_changes() {
        let mut old = base_table();
        old.add_index(Index::new("name_idx", IndexKind::Index, vec!["name".into()]))
            .unwrap();
        let mut new = base_table();
        new.add_column(Column::new("email", "text"));
        new.add_index(Index::new(
            "name_idx",
            IndexKind::Unique,
            vec!["name".into()],
        ))
        .unwrap();

        let statements = diff(&old, &new, &PostgresDialect).statements();
        assert!(statements[0].contains("DROP INDEX IF EXISTS name_idx"));
        assert!(statements.iter().any(|s| s.contains("CREATE UNIQUE INDEX name_idx")));
        assert!(statements.iter().any(|s| s.contains("ADD COLUMN email")));
    }

    #[tokio::test]
    async fn successful_change_discards_its_fallback() {
        let old = base_table();
        let mut new = base_table();
        // Same name, different type: change with drop+add fallback.
        new.add_column(Column::new("name", "varchar(64)"));

        let db = MockDatabase::new("main");
        let sql = update(&db, &old, &new, true).await.unwrap();
        assert!(sql.iter().any(|s| s.contains("ALTER COLUMN name TYPE")));

        let executed = db.executed();
        assert!(executed.iter().any(|s| s.contains("ALTER COLUMN name TYPE")));
        assert!(!executed.iter().any(|s| s.contains("DROP COLUMN name")));
    }

    #[tokio::test]
    async fn failed_change_falls_back_to_drop_and_add() {
        let old = base_table();
        let mut new = base_table();
        new.add_column(Column::new("name", "varchar(64)"));

        let db = MockDatabase::new("main");
        db.fail_matching("ALTER COLUMN name TYPE");
        update(&db, &old, &new, true).await.unwrap();

        let executed = db.executed();
        assert!(executed.iter().any(|s| s.contains("DROP COLUMN name")));
        assert!(executed.iter().any(|s| s.contains("ADD COLUMN name VARCHAR(64)")));
    }

    #[tokio::test]
    async fn dry_run_returns_the_same_statements_without_executing() {
        let old = base_table();
        let mut new = base_table();
        new.add_column(Column::new("email", "text"));

        let db = MockDatabase::new("main");
        let sql = update(&db, &old, &new, false).await.unwrap();
        assert_eq!(sql.len(), 1);
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn missing_table_degrades_to_create() {
        let db = MockDatabase::new("main");
        let table = base_table();
        let sql = synchronize(&db, &table, false).await.unwrap();
        assert!(sql[0].starts_with("CREATE TABLE people"));
        assert!(!sql.iter().any(|s| s.contains("ALTER")));
    }

    #[tokio::test]
    async fn existing_similar_table_synchronizes_to_nothing() {
        let db = MockDatabase::new("main");
        let table = base_table();
        db.define_table(table.clone());
        let sql = synchronize(&db, &table, false).await.unwrap();
        assert!(sql.is_empty());
    }

    #[test]
    fn applying_the_declared_schema_converges() {
        // Once the live table equals the declared table, a second diff is empty.
        let old = base_table();
        let mut new = base_table();
        new.add_column(Column::new("email", "text"));
        assert!(!diff(&old, &new, &PostgresDialect).is_empty());
        assert!(diff(&new.clone(), &new, &PostgresDialect).is_empty());
    }
}
