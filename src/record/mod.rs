//! Active-record instances
//!
//! A `Record` binds a `ClassMeta` to one row's worth of dynamic members.
//! Dirty tracking compares the current member map against `original`, the
//! last state known to be persisted; everything the persistence layer writes
//! flows through `to_database` normalization first.

pub mod persistence;
pub mod relations;

pub use persistence::RegisterStatus;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::SqlRow;
use crate::meta::{ClassMeta, ColumnType};
use crate::value::DbValue;

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Constructed; existence in the database unknown
    Unknown,
    /// Fetched from, or successfully written to, the database
    Exists,
    /// Inserted by this instance
    Inserted,
    /// Deleted; terminal
    Deleted,
}

/// One database row as a live object
#[derive(Debug, Clone)]
pub struct Record {
    meta: Arc<ClassMeta>,
    members: HashMap<String, DbValue>,
    original: HashMap<String, DbValue>,
    /// Attached has_one children, stored before this record on `store`
    related: HashMap<String, Record>,
    is_new_cached: Option<bool>,
    polymorphic_leaf: Option<String>,
    pub(crate) storing: bool,
    status: RecordStatus,
    fix_broken_references: bool,
}

impl Record {
    /// New empty record with class defaults loaded
    pub fn new(meta: Arc<ClassMeta>) -> Self {
        let mut members = HashMap::new();
        for column in meta.columns() {
            let value = meta.default_for(column).cloned().unwrap_or(DbValue::Null);
            members.insert(column.to_string(), value);
        }
        Self {
            meta,
            members,
            original: HashMap::new(),
            related: HashMap::new(),
            is_new_cached: None,
            polymorphic_leaf: None,
            storing: false,
            status: RecordStatus::Unknown,
            fix_broken_references: false,
        }
    }

    /// New record with primary keys set but nothing fetched
    pub fn with_id(meta: Arc<ClassMeta>, id: impl Into<DbValue>) -> Self {
        let mut record = Self::new(meta);
        if let Some(id_column) = record.meta.id_column().map(str::to_string) {
            record.set_member(&id_column, id.into());
        }
        record
    }

    /// Record hydrated from a fetched row; `original` captures the row as the
    /// persisted baseline.
    pub fn from_row(meta: Arc<ClassMeta>, row: SqlRow) -> Self {
        Self::from_members(meta, row.into_values())
    }

    /// Record hydrated from an already-loaded member map
    pub fn from_members(meta: Arc<ClassMeta>, members: HashMap<String, DbValue>) -> Self {
        let mut record = Self::new(meta);
        record.initialize_members(members);
        record
    }

    pub(crate) fn initialize_members(&mut self, values: HashMap<String, DbValue>) {
        for (column, value) in values {
            self.members.insert(column, value);
        }
        self.original = self.members.clone();
        if let Some(column) = self.meta.polymorphic_column() {
            self.polymorphic_leaf = self
                .members
                .get(column)
                .and_then(DbValue::as_str)
                .map(str::to_string);
        }
        self.is_new_cached = Some(false);
        self.status = RecordStatus::Exists;
    }

    pub fn meta(&self) -> &Arc<ClassMeta> {
        &self.meta
    }

    pub fn class_name(&self) -> &str {
        self.meta.name()
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    /// Opt in to self-healing of broken has_one references
    pub fn set_fix_broken_references(&mut self, fix: bool) {
        self.fix_broken_references = fix;
    }

    pub(crate) fn fix_broken_references(&self) -> bool {
        self.fix_broken_references
    }

    pub fn member(&self, name: &str) -> DbValue {
        self.members.get(name).cloned().unwrap_or(DbValue::Null)
    }

    pub fn member_i64(&self, name: &str) -> Option<i64> {
        self.members.get(name).and_then(DbValue::as_i64)
    }

    pub fn member_str(&self, name: &str) -> Option<String> {
        self.members
            .get(name)
            .and_then(DbValue::as_str)
            .map(str::to_string)
    }

    pub fn member_bool(&self, name: &str) -> Option<bool> {
        self.members.get(name).and_then(DbValue::as_bool)
    }

    pub fn member_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.members.get(name).and_then(DbValue::as_timestamp)
    }

    pub fn member_is_empty(&self, name: &str) -> bool {
        self.member(name).is_empty()
    }

    /// Set one member. Touching a primary-key column invalidates the cached
    /// is-new answer.
    pub fn set_member(&mut self, name: &str, value: impl Into<DbValue>) -> &mut Self {
        let value = value.into();
        if self.meta.primary_keys().iter().any(|k| k == name) {
            self.is_new_cached = None;
        }
        self.members.insert(name.to_string(), value);
        self
    }

    /// Attach a has_one child; its key lands in the member once stored
    pub fn set_object(&mut self, member: &str, child: Record) -> &mut Self {
        let child_id = child.id();
        self.set_member(member, child_id);
        self.related.insert(member.to_string(), child);
        self
    }

    pub(crate) fn related_cache(&self) -> &HashMap<String, Record> {
        &self.related
    }

    pub(crate) fn related_cache_mut(&mut self) -> &mut HashMap<String, Record> {
        &mut self.related
    }

    pub(crate) fn cache_related(&mut self, member: &str, child: Record) {
        self.related.insert(member.to_string(), child);
    }

    pub fn id(&self) -> DbValue {
        match self.meta.id_column() {
            Some(column) => self.member(column),
            None => DbValue::Null,
        }
    }

    pub fn has_primary_keys(&self) -> bool {
        !self.meta.primary_keys().is_empty()
            && self
                .meta
                .primary_keys()
                .iter()
                .all(|key| !self.member_is_empty(key))
    }

    pub(crate) fn primary_key_values(&self) -> Vec<(String, DbValue)> {
        self.meta
            .primary_keys()
            .iter()
            .map(|key| (key.clone(), self.member(key)))
            .collect()
    }

    pub(crate) fn is_new_cached(&self) -> Option<bool> {
        self.is_new_cached
    }

    pub(crate) fn set_is_new_cached(&mut self, is_new: Option<bool>) {
        self.is_new_cached = is_new;
    }

    pub(crate) fn polymorphic_leaf(&self) -> Option<&str> {
        self.polymorphic_leaf.as_deref()
    }

    pub(crate) fn take_state(self) -> (HashMap<String, DbValue>, HashMap<String, DbValue>, RecordStatus) {
        (self.members, self.original, self.status)
    }

    pub(crate) fn restore_state(
        &mut self,
        members: HashMap<String, DbValue>,
        original: HashMap<String, DbValue>,
        status: RecordStatus,
    ) {
        self.members = members;
        self.original = original;
        self.status = status;
    }

    /// Current members normalized for persistence
    pub fn to_database(&self, now: DateTime<Utc>) -> Vec<(String, DbValue)> {
        let mut normalized = Vec::new();
        for column in self.meta.columns() {
            let Some(column_type) = self.meta.column_type(column) else {
                continue;
            };
            let value = self.member(column);
            normalized.push((column.to_string(), column_type.to_database(&value, now)));
        }
        normalized
    }

    /// Did the named members change since the last persisted state?
    ///
    /// Values are normalized before comparison, except the auto-refreshing
    /// timestamp columns, which would otherwise always read as dirty.
    pub fn members_changed<I, S>(&self, members: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        for member in members {
            let member = member.as_ref();
            let current = self.member(member);
            let current = match self.meta.column_type(member) {
                Some(ColumnType::Created) | Some(ColumnType::Modified) | None => current,
                Some(column_type) => column_type.to_database(&current, now),
            };
            let original = self.original.get(member).cloned().unwrap_or(DbValue::Null);
            if original != current {
                return true;
            }
        }
        false
    }

    /// Did any declared column change?
    pub fn changed(&self) -> bool {
        let columns: Vec<String> = self.meta.columns().map(str::to_string).collect();
        self.members_changed(columns)
    }

    /// Per-member (old, new) pairs for everything that changed
    pub fn changes(&self) -> Vec<(String, DbValue, DbValue)> {
        self.meta
            .columns()
            .filter(|c| self.members_changed([*c]))
            .map(|c| {
                (
                    c.to_string(),
                    self.original.get(c).cloned().unwrap_or(DbValue::Null),
                    self.member(c),
                )
            })
            .collect()
    }

    pub(crate) fn commit_members(&mut self) {
        self.original = self.members.clone();
    }

    pub(crate) fn commit_member(&mut self, member: &str) {
        if let Some(value) = self.members.get(member) {
            self.original.insert(member.to_string(), value.clone());
        }
    }

    /// All members as a plain map (serialization input)
    pub fn members_map(&self) -> &HashMap<String, DbValue> {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, ColumnType};

    fn meta() -> Arc<ClassMeta> {
        Arc::new(
            ClassMeta::new("Widget", "widgets")
                .with_id("id")
                .with_column("name", ColumnType::Text)
                .with_column("active", ColumnType::Boolean)
                .with_default("active", DbValue::Bool(true)),
        )
    }

    #[test]
    fn defaults_are_loaded() {
        let record = Record::new(meta());
        assert_eq!(record.member("active"), DbValue::Bool(true));
        assert_eq!(record.member("name"), DbValue::Null);
        assert_eq!(record.status(), RecordStatus::Unknown);
    }

    #[test]
    fn hydration_captures_the_baseline() {
        let row = crate::testing::row([
            ("id", DbValue::Int(3)),
            ("name", DbValue::Text("gear".into())),
            ("active", DbValue::Bool(false)),
        ]);
        let record = Record::from_row(meta(), row);
        assert_eq!(record.status(), RecordStatus::Exists);
        assert!(!record.changed());
    }

    #[test]
    fn mutation_marks_members_dirty() {
        let row = crate::testing::row([
            ("id", DbValue::Int(3)),
            ("name", DbValue::Text("gear".into())),
            ("active", DbValue::Bool(false)),
        ]);
        let mut record = Record::from_row(meta(), row);
        record.set_member("name", "sprocket");
        assert!(record.changed());
        assert!(record.members_changed(["name"]));
        assert!(!record.members_changed(["active"]));
        let changes = record.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "name");
    }

    #[test]
    fn setting_a_primary_key_invalidates_is_new_cache() {
        let mut record = Record::new(meta());
        record.set_is_new_cached(Some(false));
        record.set_member("id", 8);
        assert_eq!(record.is_new_cached(), None);
    }

    #[test]
    fn boolean_normalization_compares_equal() {
        let row = crate::testing::row([("id", DbValue::Int(1)), ("active", DbValue::Bool(true))]);
        let mut record = Record::from_row(meta(), row);
        // An integer 1 means the same as true after normalization.
        record.set_member("active", DbValue::Int(1));
        assert!(!record.members_changed(["active"]));
    }
}
