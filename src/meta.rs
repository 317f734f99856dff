//! Class metadata
//!
//! `ClassMeta` is the per-model static descriptor: table, column types,
//! keys, and relation maps. One descriptor exists per class, cached in a
//! `ClassRegistry`. Column types drive value normalization on the way to
//! the database.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{OrmError, OrmResult};
use crate::schema::SchemaDefinition;
use crate::value::DbValue;

/// Logical member types tracked per column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-increment integer primary key
    Id,
    Integer,
    Double,
    Text,
    Boolean,
    Timestamp,
    /// Timestamp set once at insert time
    Created,
    /// Timestamp refreshed on every store
    Modified,
    Json,
    /// Foreign key to another class; the value is the far record's id
    Object(String),
}

impl ColumnType {
    /// Normalize a member value for persistence
    pub fn to_database(&self, value: &DbValue, now: DateTime<Utc>) -> DbValue {
        match self {
            ColumnType::Id | ColumnType::Integer | ColumnType::Object(_) => {
                match value.as_i64() {
                    Some(i) => DbValue::Int(i),
                    None => DbValue::Null,
                }
            }
            ColumnType::Double => match value {
                DbValue::Float(f) => DbValue::Float(*f),
                DbValue::Int(i) => DbValue::Float(*i as f64),
                _ => DbValue::Null,
            },
            ColumnType::Text => match value {
                DbValue::Null => DbValue::Null,
                DbValue::Text(s) => DbValue::Text(s.clone()),
                other => DbValue::Text(other.to_json().to_string()),
            },
            ColumnType::Boolean => match value.as_bool() {
                Some(b) => DbValue::Bool(b),
                None => DbValue::Null,
            },
            ColumnType::Timestamp => match value.as_timestamp() {
                Some(ts) => DbValue::Timestamp(ts),
                None => DbValue::Null,
            },
            ColumnType::Created => match value.as_timestamp() {
                Some(ts) => DbValue::Timestamp(ts),
                None => DbValue::Timestamp(now),
            },
            ColumnType::Modified => DbValue::Timestamp(now),
            ColumnType::Json => match value {
                DbValue::Json(j) => DbValue::Json(j.clone()),
                DbValue::Null => DbValue::Null,
                other => DbValue::Json(other.to_json()),
            },
        }
    }
}

/// Singular relation: this record holds the far record's key
#[derive(Debug, Clone)]
pub struct HasOneSpec {
    /// Far class name; when `dynamic_class_member` is set this is ignored and
    /// the class is read from that member at runtime (`*member` indirection).
    pub class: String,
    pub dynamic_class_member: Option<String>,
}

/// Collection relation: far records hold this record's key
#[derive(Debug, Clone)]
pub struct HasManySpec {
    pub class: String,
    /// Column on the far table referencing this record
    pub foreign_key: String,
    pub order_by: Option<String>,
}

/// Per-class static metadata
#[derive(Debug, Clone)]
pub struct ClassMeta {
    name: String,
    table: String,
    database: String,
    id_column: Option<String>,
    auto_column: Option<String>,
    primary_keys: Vec<String>,
    column_types: Vec<(String, ColumnType)>,
    defaults: HashMap<String, DbValue>,
    has_one: HashMap<String, HasOneSpec>,
    has_many: HashMap<String, HasManySpec>,
    find_keys: Vec<String>,
    duplicate_keys: Vec<String>,
    /// Column naming the concrete leaf class for rows of this base class
    polymorphic_column: Option<String>,
    schema: Option<SchemaDefinition>,
}

impl ClassMeta {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            database: "default".to_string(),
            id_column: None,
            auto_column: None,
            primary_keys: Vec::new(),
            column_types: Vec::new(),
            defaults: HashMap::new(),
            has_one: HashMap::new(),
            has_many: HashMap::new(),
            find_keys: Vec::new(),
            duplicate_keys: Vec::new(),
            polymorphic_column: None,
            schema: None,
        }
    }

    /// Declare an auto-increment `id` column as primary key
    pub fn with_id(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.id_column = Some(column.clone());
        self.auto_column = Some(column.clone());
        self.primary_keys = vec![column.clone()];
        self.column_types.insert(0, (column, ColumnType::Id));
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.column_types.push((name.into(), column_type));
        self
    }

    pub fn with_default(mut self, column: impl Into<String>, value: DbValue) -> Self {
        self.defaults.insert(column.into(), value);
        self
    }

    pub fn with_primary_keys(mut self, keys: Vec<String>) -> Self {
        self.primary_keys = keys;
        self
    }

    pub fn with_has_one(mut self, member: impl Into<String>, class: impl Into<String>) -> Self {
        let member = member.into();
        let class = class.into();
        if !self.has_column(&member) {
            self.column_types
                .push((member.clone(), ColumnType::Object(class.clone())));
        }
        self.has_one.insert(
            member,
            HasOneSpec {
                class,
                dynamic_class_member: None,
            },
        );
        self
    }

    /// has_one whose far class is named at runtime by another member
    pub fn with_dynamic_has_one(
        mut self,
        member: impl Into<String>,
        class_member: impl Into<String>,
    ) -> Self {
        let member = member.into();
        if !self.has_column(&member) {
            self.column_types
                .push((member.clone(), ColumnType::Integer));
        }
        self.has_one.insert(
            member,
            HasOneSpec {
                class: String::new(),
                dynamic_class_member: Some(class_member.into()),
            },
        );
        self
    }

    pub fn with_has_many(mut self, member: impl Into<String>, spec: HasManySpec) -> Self {
        self.has_many.insert(member.into(), spec);
        self
    }

    pub fn with_find_keys(mut self, keys: Vec<String>) -> Self {
        self.find_keys = keys;
        self
    }

    pub fn with_duplicate_keys(mut self, keys: Vec<String>) -> Self {
        self.duplicate_keys = keys;
        self
    }

    pub fn with_polymorphic_column(mut self, column: impl Into<String>) -> Self {
        self.polymorphic_column = Some(column.into());
        self
    }

    pub fn with_schema(mut self, schema: SchemaDefinition) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Every id/primary-key column must be a declared column
    pub fn validate(&self) -> OrmResult<()> {
        let mut required: Vec<&String> = self.primary_keys.iter().collect();
        if let Some(id) = &self.id_column {
            required.push(id);
        }
        for key in required {
            if !self.has_column(key) {
                return Err(OrmError::Configuration(format!(
                    "{}: key column '{}' is not declared in column_types",
                    self.name, key
                )));
            }
        }
        for key in self.find_keys.iter().chain(self.duplicate_keys.iter()) {
            if !self.has_column(key) {
                return Err(OrmError::Configuration(format!(
                    "{}: key column '{}' is not declared in column_types",
                    self.name, key
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn id_column(&self) -> Option<&str> {
        self.id_column.as_deref()
    }

    pub fn auto_column(&self) -> Option<&str> {
        self.auto_column.as_deref()
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.column_types.iter().map(|(name, _)| name.as_str())
    }

    pub fn column_type(&self, name: &str) -> Option<&ColumnType> {
        self.column_types
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_type(name).is_some()
    }

    pub fn default_for(&self, column: &str) -> Option<&DbValue> {
        self.defaults.get(column)
    }

    pub fn has_one(&self, member: &str) -> Option<&HasOneSpec> {
        self.has_one.get(member)
    }

    pub fn has_one_members(&self) -> impl Iterator<Item = (&str, &HasOneSpec)> {
        self.has_one.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_many(&self, member: &str) -> Option<&HasManySpec> {
        self.has_many.get(member)
    }

    pub fn has_many_members(&self) -> impl Iterator<Item = (&str, &HasManySpec)> {
        self.has_many.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn find_keys(&self) -> &[String] {
        &self.find_keys
    }

    pub fn duplicate_keys(&self) -> &[String] {
        &self.duplicate_keys
    }

    pub fn polymorphic_column(&self) -> Option<&str> {
        self.polymorphic_column.as_deref()
    }

    pub fn schema(&self) -> Option<&SchemaDefinition> {
        self.schema.as_ref()
    }
}

/// One cached descriptor per class name
#[derive(Default)]
pub struct ClassRegistry {
    classes: DashMap<String, Arc<ClassMeta>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, meta: ClassMeta) -> OrmResult<Arc<ClassMeta>> {
        meta.validate()?;
        let meta = Arc::new(meta);
        self.classes.insert(meta.name().to_string(), meta.clone());
        Ok(meta)
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<ClassMeta>> {
        self.classes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrmError::Configuration(format!("class '{}' is not registered", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_must_be_declared() {
        let meta = ClassMeta::new("Widget", "widgets")
            .with_column("name", ColumnType::Text)
            .with_primary_keys(vec!["id".to_string()]);
        assert!(matches!(
            meta.validate(),
            Err(OrmError::Configuration(_))
        ));
    }

    #[test]
    fn with_id_declares_and_keys_the_column() {
        let meta = ClassMeta::new("Widget", "widgets")
            .with_id("id")
            .with_column("name", ColumnType::Text);
        meta.validate().unwrap();
        assert_eq!(meta.auto_column(), Some("id"));
        assert_eq!(meta.primary_keys(), ["id"]);
        assert_eq!(meta.column_type("id"), Some(&ColumnType::Id));
    }

    #[test]
    fn has_one_on_a_declared_column_does_not_duplicate_it() {
        let meta = ClassMeta::new("Lock", "locks")
            .with_id("id")
            .with_column("server", ColumnType::Object("Server".to_string()))
            .with_has_one("server", "Server");
        let count = meta.columns().filter(|c| *c == "server").count();
        assert_eq!(count, 1);
        assert!(meta.has_one("server").is_some());
    }

    #[test]
    fn dynamic_has_one_on_a_declared_column_does_not_duplicate_it() {
        let meta = ClassMeta::new("Event", "events")
            .with_id("id")
            .with_column("subject", ColumnType::Integer)
            .with_column("subject_class", ColumnType::Text)
            .with_dynamic_has_one("subject", "subject_class");
        let count = meta.columns().filter(|c| *c == "subject").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn modified_column_always_refreshes() {
        let now = Utc::now();
        let normalized = ColumnType::Modified.to_database(&DbValue::Null, now);
        assert_eq!(normalized, DbValue::Timestamp(now));
    }

    #[test]
    fn registry_caches_by_name() {
        let registry = ClassRegistry::new();
        registry
            .register(ClassMeta::new("Widget", "widgets").with_id("id"))
            .unwrap();
        assert!(registry.get("Widget").is_ok());
        assert!(registry.get("Gadget").is_err());
    }
}
