//! Physical index representation

use std::fmt;

/// Index flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Index,
    Unique,
    Primary,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Index => write!(f, "INDEX"),
            IndexKind::Unique => write!(f, "UNIQUE"),
            IndexKind::Primary => write!(f, "PRIMARY"),
        }
    }
}

/// Name reserved for the primary index on every table
pub const PRIMARY_INDEX_NAME: &str = "PRIMARY";

/// One index of a database table: a kind plus an ordered column list
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    kind: IndexKind,
    columns: Vec<String>,
}

impl Index {
    pub fn new(name: impl Into<String>, kind: IndexKind, columns: Vec<String>) -> Self {
        let name = if kind == IndexKind::Primary {
            PRIMARY_INDEX_NAME.to_string()
        } else {
            name.into()
        };
        Self { name, kind, columns }
    }

    pub fn primary(columns: Vec<String>) -> Self {
        Self::new(PRIMARY_INDEX_NAME, IndexKind::Primary, columns)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.kind == IndexKind::Primary
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Extend the column list, keeping order and skipping duplicates.
    /// Used when a schema definition amends an existing PRIMARY index.
    pub fn add_columns(&mut self, columns: &[String]) {
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
    }

    /// Same kind and identical column sequence
    pub fn is_similar(&self, that: &Index) -> bool {
        let similar = self.kind == that.kind && self.columns == that.columns;
        if !similar {
            tracing::debug!(index = %self.name, "indexes differ: {:?} vs {:?}", self, that);
        }
        similar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_index_name_is_forced() {
        let index = Index::new("pk_whatever", IndexKind::Primary, vec!["id".to_string()]);
        assert_eq!(index.name(), PRIMARY_INDEX_NAME);
        assert!(index.is_primary());
    }

    #[test]
    fn column_order_matters() {
        let a = Index::new("ab", IndexKind::Unique, vec!["a".into(), "b".into()]);
        let b = Index::new("ab", IndexKind::Unique, vec!["b".into(), "a".into()]);
        assert!(!a.is_similar(&b));
    }

    #[test]
    fn amend_skips_existing_columns() {
        let mut index = Index::primary(vec!["id".to_string()]);
        index.add_columns(&["id".to_string(), "tenant".to_string()]);
        assert_eq!(index.columns(), ["id", "tenant"]);
    }
}
