//! Physical column representation
//!
//! `Column` captures one column of a live or declared table. The similarity
//! check here is what decides whether the diff engine emits an in-place
//! change for a column.

use std::collections::BTreeMap;

use crate::value::DbValue;

/// One column of a database table
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    sql_type: String,
    not_null: bool,
    default: Option<DbValue>,
    /// Rename hint: the column's name in an earlier version of the schema
    previous_name: Option<String>,
    increment: bool,
    binary: bool,
    /// Extra dialect options (`add_sql`, `after_column`, ...)
    extras: BTreeMap<String, String>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into().to_lowercase(),
            not_null: false,
            default: None,
            previous_name: None,
            increment: false,
            binary: false,
            extras: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    pub fn not_null(&self) -> bool {
        self.not_null
    }

    pub fn set_not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    pub fn default_value(&self) -> Option<&DbValue> {
        self.default.as_ref()
    }

    pub fn set_default(mut self, default: Option<DbValue>) -> Self {
        self.default = default;
        self
    }

    pub fn previous_name(&self) -> Option<&str> {
        self.previous_name.as_deref()
    }

    pub fn set_previous_name(mut self, previous: impl Into<String>) -> Self {
        self.previous_name = Some(previous.into());
        self
    }

    pub fn is_increment(&self) -> bool {
        self.increment
    }

    pub fn set_increment(mut self, increment: bool) -> Self {
        self.increment = increment;
        self
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn set_binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extras.insert(key.into(), value.into());
    }

    /// Field-by-field differences against another column, keyed by attribute
    /// name. Cosmetic attributes (rename hints, extras) do not participate.
    pub fn differences(&self, that: &Column) -> Vec<(&'static str, String)> {
        let mut diffs = Vec::new();
        if normalize_type(&self.sql_type) != normalize_type(&that.sql_type) {
            diffs.push(("sql_type", format!("{} != {}", self.sql_type, that.sql_type)));
        }
        if self.not_null != that.not_null {
            diffs.push(("not_null", format!("{} != {}", self.not_null, that.not_null)));
        }
        if self.default != that.default {
            diffs.push(("default", format!("{:?} != {:?}", self.default, that.default)));
        }
        if self.increment != that.increment {
            diffs.push(("increment", format!("{} != {}", self.increment, that.increment)));
        }
        diffs
    }

    /// Structural equality ignoring cosmetic differences
    pub fn is_similar(&self, that: &Column) -> bool {
        let diffs = self.differences(that);
        if !diffs.is_empty() {
            tracing::debug!(column = %self.name, ?diffs, "columns differ");
        }
        diffs.is_empty()
    }
}

/// Collapse dialect synonyms so `int8`/`bigint` or `serial` expansions do not
/// register as spurious differences when diffing live against declared.
fn normalize_type(sql_type: &str) -> String {
    let t = sql_type.trim().to_lowercase();
    match t.as_str() {
        "int8" | "bigserial" => "bigint".to_string(),
        "int4" | "int" | "serial" => "integer".to_string(),
        "int2" | "smallserial" => "smallint".to_string(),
        "bool" => "boolean".to_string(),
        "float8" => "double precision".to_string(),
        "timestamptz" => "timestamp with time zone".to_string(),
        _ => t,
    }
}
