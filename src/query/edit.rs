//! Shared core of the writing builders
//!
//! Insert and update both funnel column assignments through `EditCore`,
//! which enforces that every target column was declared valid for its alias.
//! That check is the builders' injection-safety invariant: column names are
//! never interpolated into SQL unless they were registered up front.

use std::collections::HashMap;

use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::value::DbValue;

pub(crate) const DEFAULT_ALIAS: &str = "";

/// Column/value accumulation with per-alias valid-column checking
#[derive(Debug, Clone, Default)]
pub struct EditCore {
    table: String,
    valid_columns: HashMap<String, Vec<String>>,
    values: Vec<(String, DbValue)>,
}

impl EditCore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            valid_columns: HashMap::new(),
            values: Vec::new(),
        }
    }

    /// Table plus all declared columns of a class
    pub fn for_class(meta: &ClassMeta) -> Self {
        let mut core = Self::new(meta.table().to_string());
        core.add_valid_columns(
            DEFAULT_ALIAS,
            meta.columns().map(str::to_string).collect(),
        );
        core
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn add_valid_columns(&mut self, alias: &str, columns: Vec<String>) {
        self.valid_columns
            .entry(alias.to_string())
            .or_default()
            .extend(columns);
    }

    fn check_column(&self, column: &str) -> OrmResult<()> {
        let (alias, name) = match column.split_once('.') {
            Some((alias, name)) => (alias, name),
            None => (DEFAULT_ALIAS, column),
        };
        let valid = self
            .valid_columns
            .get(alias)
            .map(|columns| columns.iter().any(|c| c == name))
            .unwrap_or(false);
        if valid {
            Ok(())
        } else {
            Err(OrmError::Query(format!(
                "column '{}' is not a valid column for table '{}'",
                column, self.table
            )))
        }
    }

    /// Assign one column. Errors when the column was never declared valid.
    pub fn value(&mut self, column: &str, value: impl Into<DbValue>) -> OrmResult<&mut Self> {
        self.check_column(column)?;
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| c == column) {
            Some(entry) => entry.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
        Ok(self)
    }

    /// Assign many columns at once
    pub fn set_values(
        &mut self,
        pairs: impl IntoIterator<Item = (String, DbValue)>,
    ) -> OrmResult<&mut Self> {
        for (column, value) in pairs {
            self.value(&column, value)?;
        }
        Ok(self)
    }

    pub fn values(&self) -> &[(String, DbValue)] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, ColumnType};

    fn core() -> EditCore {
        EditCore::for_class(
            &ClassMeta::new("Lock", "locks")
                .with_id("id")
                .with_column("code", ColumnType::Text),
        )
    }

    #[test]
    fn declared_column_is_accepted() {
        let mut core = core();
        core.value("code", "startup").unwrap();
        assert_eq!(core.values().len(), 1);
    }

    #[test]
    fn undeclared_column_is_rejected() {
        let mut core = core();
        let err = core.value("pid; DROP TABLE locks", 1).unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
        assert!(core.is_empty());
    }

    #[test]
    fn reassignment_overwrites_not_duplicates() {
        let mut core = core();
        core.value("code", "a").unwrap();
        core.value("code", "b").unwrap();
        assert_eq!(core.values().len(), 1);
        assert_eq!(core.values()[0].1, DbValue::Text("b".into()));
    }
}
