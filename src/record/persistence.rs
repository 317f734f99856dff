//! Record persistence: fetch, store, delete, register

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use tracing::debug;

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ColumnType;
use crate::query::{DeleteQuery, InsertQuery, SelectQuery, UpdateQuery};
use crate::value::DbValue;

use super::{Record, RecordStatus};

/// Outcome of `register`: the row was already there, or we created it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    Exists,
    Inserted,
}

impl Record {
    /// Does this record not yet exist in the database?
    ///
    /// The answer is cached; setting a primary-key member invalidates it.
    pub async fn is_new(&mut self, db: &dyn Database) -> OrmResult<bool> {
        if let Some(cached) = self.is_new_cached() {
            return Ok(cached);
        }
        let is_new = if let Some(auto) = self.meta().auto_column().map(str::to_string) {
            self.member_is_empty(&auto)
        } else if !self.has_primary_keys() {
            true
        } else {
            let keys = self.primary_key_values();
            let query = SelectQuery::for_class(self.meta().clone()).filter(|w| {
                for (column, value) in keys {
                    w.eq(&format!("X.{}", column), value);
                }
            });
            query.count(db).await? == 0
        };
        self.set_is_new_cached(Some(is_new));
        Ok(is_new)
    }

    /// Does a row with this record's primary keys exist?
    pub async fn exists(&self, db: &dyn Database) -> OrmResult<bool> {
        if !self.has_primary_keys() {
            return Ok(false);
        }
        let keys = self.primary_key_values();
        let query = SelectQuery::for_class(self.meta().clone()).filter(|w| {
            for (column, value) in keys {
                w.eq(&format!("X.{}", column), value);
            }
        });
        Ok(query.count(db).await? > 0)
    }

    /// Load this record's row by primary key
    pub async fn fetch(&mut self, db: &dyn Database) -> OrmResult<&mut Self> {
        if !self.has_primary_keys() {
            return Err(OrmError::empty(
                self.class_name(),
                "fetch requires primary keys",
            ));
        }
        let keys = self.primary_key_values();
        let context = keys
            .iter()
            .map(|(column, value)| format!("{}={}", column, value.to_sql_literal()))
            .collect::<Vec<_>>()
            .join(", ");
        let query = SelectQuery::for_class(self.meta().clone()).filter(|w| {
            for (column, value) in keys {
                w.eq(&format!("X.{}", column), value);
            }
        });
        let row = query
            .fetch_optional(db)
            .await?
            .ok_or_else(|| OrmError::not_found(self.class_name(), context))?;
        self.initialize_members(row.into_values());
        Ok(self)
    }

    /// Look the record up by its find keys (primary keys when none are
    /// declared). Hydrates and returns true on a hit.
    pub async fn find(&mut self, db: &dyn Database) -> OrmResult<bool> {
        let keys: Vec<String> = if self.meta().find_keys().is_empty() {
            self.meta().primary_keys().to_vec()
        } else {
            self.meta().find_keys().to_vec()
        };
        if keys.is_empty() {
            return Err(OrmError::empty(self.class_name(), "no find keys declared"));
        }
        let pairs: Vec<(String, DbValue)> =
            keys.iter().map(|k| (k.clone(), self.member(k))).collect();
        let query = SelectQuery::for_class(self.meta().clone())
            .filter(|w| {
                for (column, value) in pairs {
                    w.eq(&format!("X.{}", column), value);
                }
            })
            .limit(1);
        match query.fetch_optional(db).await? {
            Some(row) => {
                self.initialize_members(row.into_values());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Find-or-create by find keys.
    ///
    /// Attached children register first so their keys land in this record's
    /// members before the find runs.
    pub async fn register(&mut self, db: &dyn Database) -> OrmResult<RegisterStatus> {
        self.register_inner(db).await
    }

    fn register_inner<'a>(
        &'a mut self,
        db: &'a dyn Database,
    ) -> Pin<Box<dyn Future<Output = OrmResult<RegisterStatus>> + Send + 'a>> {
        Box::pin(async move {
            self.register_children(db).await?;
            // A populated generated key means the row was already resolved.
            if self.meta().auto_column().is_some() && self.has_primary_keys() {
                self.set_status(RecordStatus::Exists);
                return Ok(RegisterStatus::Exists);
            }
            if self.find(db).await? {
                return Ok(RegisterStatus::Exists);
            }
            self.store(db).await?;
            Ok(RegisterStatus::Inserted)
        })
    }

    async fn register_children(&mut self, db: &dyn Database) -> OrmResult<()> {
        let mut related = std::mem::take(self.related_cache_mut());
        let mut result = Ok(());
        for (member, child) in related.iter_mut() {
            match child.register_inner(db).await {
                Ok(_) => {
                    let child_id = child.id();
                    self.set_member(member, child_id);
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        *self.related_cache_mut() = related;
        result
    }

    /// Would storing this record collide with another row on the declared
    /// duplicate keys?
    pub async fn is_duplicate(&self, db: &dyn Database) -> OrmResult<bool> {
        let keys = self.meta().duplicate_keys().to_vec();
        if keys.is_empty() {
            return Ok(false);
        }
        let pairs: Vec<(String, DbValue)> =
            keys.iter().map(|k| (k.clone(), self.member(k))).collect();
        let primaries = if self.has_primary_keys() {
            self.primary_key_values()
        } else {
            Vec::new()
        };
        let query = SelectQuery::for_class(self.meta().clone()).filter(|w| {
            for (column, value) in pairs {
                w.eq(&format!("X.{}", column), value);
            }
            for (column, value) in primaries {
                w.ne(&format!("X.{}", column), value);
            }
        });
        Ok(query.count(db).await? > 0)
    }

    /// Persist this record: insert when new, update otherwise.
    ///
    /// Re-entrant calls (a child whose store loops back to its parent) return
    /// immediately. Dirty attached children are stored first so their keys
    /// can land in this record's members.
    pub async fn store(&mut self, db: &dyn Database) -> OrmResult<()> {
        if self.storing {
            return Ok(());
        }
        self.storing = true;
        let result = self.store_inner(db).await;
        self.storing = false;
        result
    }

    fn store_inner<'a>(
        &'a mut self,
        db: &'a dyn Database,
    ) -> Pin<Box<dyn Future<Output = OrmResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut related = std::mem::take(self.related_cache_mut());
            let mut child_result = Ok(());
            for (member, child) in related.iter_mut() {
                if child.storing {
                    continue;
                }
                if child.changed() || !child.has_primary_keys() {
                    if let Err(err) = child.store(db).await {
                        child_result = Err(err);
                        break;
                    }
                }
                let child_id = child.id();
                self.set_member(member, child_id);
            }
            *self.related_cache_mut() = related;
            child_result?;

            if self.is_duplicate(db).await? {
                return Err(OrmError::duplicate(
                    self.class_name(),
                    format!("matches on {}", self.meta().duplicate_keys().join(", ")),
                ));
            }
            if self.has_primary_keys() && !self.is_new(db).await? {
                self.update_row(db).await
            } else {
                self.insert_row(db).await
            }
        })
    }

    async fn insert_row(&mut self, db: &dyn Database) -> OrmResult<()> {
        let now = Utc::now();
        let auto = self.meta().auto_column().map(str::to_string);
        let values: Vec<(String, DbValue)> = self
            .to_database(now)
            .into_iter()
            .filter(|(column, value)| {
                if auto.as_deref() == Some(column.as_str()) && value.is_empty() {
                    return false;
                }
                !value.is_null()
            })
            .collect();
        if values.is_empty() {
            return Err(OrmError::empty(self.class_name(), "nothing to insert"));
        }
        let query = InsertQuery::for_class(self.meta()).set_values(values.clone())?;
        let inserted_id = if auto.is_some() {
            match query.execute_returning_id(db).await {
                Ok(id) => Some(id),
                Err(OrmError::UniqueViolation(message)) => {
                    return Err(OrmError::duplicate(self.class_name(), message));
                }
                Err(err) => {
                    return Err(OrmError::store(self.class_name(), "insert failed", Some(err)));
                }
            }
        } else {
            match query.execute(db).await {
                Ok(_) => None,
                Err(OrmError::UniqueViolation(message)) => {
                    return Err(OrmError::duplicate(self.class_name(), message));
                }
                Err(err) => {
                    return Err(OrmError::store(self.class_name(), "insert failed", Some(err)));
                }
            }
        };
        for (column, value) in values {
            self.set_member(&column, value);
        }
        if let (Some(auto), Some(id)) = (auto, inserted_id) {
            self.set_member(&auto, id);
        }
        self.commit_members();
        self.set_is_new_cached(Some(false));
        self.set_status(RecordStatus::Inserted);
        Ok(())
    }

    async fn update_row(&mut self, db: &dyn Database) -> OrmResult<()> {
        let now = Utc::now();
        let mut values: Vec<(String, DbValue)> = Vec::new();
        for (column, value) in self.to_database(now) {
            if self.meta().primary_keys().iter().any(|k| k == &column) {
                continue;
            }
            let always = matches!(
                self.meta().column_type(&column),
                Some(ColumnType::Modified)
            );
            if always || self.members_changed([column.as_str()]) {
                values.push((column, value));
            }
        }
        if values.is_empty() {
            debug!(class = self.class_name(), "store: no members changed");
            return Ok(());
        }
        let keys = self.primary_key_values();
        let query = UpdateQuery::for_class(self.meta())
            .set_values(values.clone())?
            .filter(|w| {
                for (column, value) in keys {
                    w.eq(&column, value);
                }
            });
        match query.execute(db).await {
            Ok(_) => {}
            Err(OrmError::UniqueViolation(message)) => {
                return Err(OrmError::duplicate(self.class_name(), message));
            }
            Err(err) => {
                return Err(OrmError::store(self.class_name(), "update failed", Some(err)));
            }
        }
        for (column, value) in values {
            self.set_member(&column, value);
        }
        self.commit_members();
        self.set_status(RecordStatus::Exists);
        Ok(())
    }

    /// Delete this record's row
    pub async fn delete(&mut self, db: &dyn Database) -> OrmResult<()> {
        if !self.has_primary_keys() {
            return Err(OrmError::empty(
                self.class_name(),
                "delete requires primary keys",
            ));
        }
        let keys = self.primary_key_values();
        DeleteQuery::for_class(self.meta())
            .filter(|w| {
                for (column, value) in keys {
                    w.eq(&column, value);
                }
            })
            .execute(db)
            .await?;
        self.set_is_new_cached(Some(true));
        self.set_status(RecordStatus::Deleted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::meta::ClassMeta;
    use crate::testing::{row, MockDatabase};

    fn meta() -> Arc<ClassMeta> {
        Arc::new(
            ClassMeta::new("Widget", "widgets")
                .with_id("id")
                .with_column("name", ColumnType::Text)
                .with_find_keys(vec!["name".to_string()])
                .with_duplicate_keys(vec!["name".to_string()]),
        )
    }

    #[tokio::test]
    async fn insert_assigns_the_returned_id() {
        let db = MockDatabase::new("default");
        // Duplicate-check count misses, then the insert returns an id.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(11))])]);
        let mut record = Record::new(meta());
        record.set_member("name", "gear");
        record.store(&db).await.unwrap();
        assert_eq!(record.member_i64("id"), Some(11));
        assert_eq!(record.status(), RecordStatus::Inserted);
        assert!(!record.changed());
        let executed = db.executed();
        assert!(executed[0].starts_with("SELECT COUNT(*)"), "{}", executed[0]);
        assert!(executed[1].starts_with("INSERT INTO widgets"), "{}", executed[1]);
    }

    #[tokio::test]
    async fn store_updates_only_changed_members() {
        let db = MockDatabase::new("default");
        let mut record = Record::from_row(
            meta(),
            row([("id", DbValue::Int(5)), ("name", DbValue::Text("gear".into()))]),
        );
        // Duplicate check count, then the UPDATE.
        record.set_member("name", "sprocket");
        record.store(&db).await.unwrap();
        let executed = db.executed();
        let update = executed
            .iter()
            .find(|sql| sql.starts_with("UPDATE"))
            .expect("an UPDATE ran");
        assert_eq!(update, "UPDATE widgets SET name = $1 WHERE id = $2");
        assert!(!record.changed());
    }

    #[tokio::test]
    async fn store_with_no_changes_is_a_no_op_update() {
        let db = MockDatabase::new("default");
        let mut record = Record::from_row(
            meta(),
            row([("id", DbValue::Int(5)), ("name", DbValue::Text("gear".into()))]),
        );
        record.store(&db).await.unwrap();
        assert!(db.executed().iter().all(|sql| !sql.starts_with("UPDATE")));
    }

    #[tokio::test]
    async fn duplicate_keys_block_the_store() {
        let db = MockDatabase::new("default");
        // COUNT(*) for the duplicate check returns 1.
        db.push_fetch_rows(vec![row([("total", DbValue::Int(1))])]);
        let mut record = Record::new(meta());
        record.set_member("name", "gear");
        let err = record.store(&db).await.unwrap_err();
        assert!(matches!(err, OrmError::Duplicate { .. }), "{err}");
    }

    #[tokio::test]
    async fn register_returns_exists_on_a_hit() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(7)),
            ("name", DbValue::Text("gear".into())),
        ])]);
        let mut record = Record::new(meta());
        record.set_member("name", "gear");
        let status = record.register(&db).await.unwrap();
        assert_eq!(status, RegisterStatus::Exists);
        assert_eq!(record.member_i64("id"), Some(7));
    }

    #[tokio::test]
    async fn register_inserts_on_a_miss() {
        let db = MockDatabase::new("default");
        // find() miss, duplicate-check zero, insert returning id.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("total", DbValue::Int(0))])]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(3))])]);
        let mut record = Record::new(meta());
        record.set_member("name", "gear");
        let status = record.register(&db).await.unwrap();
        assert_eq!(status, RegisterStatus::Inserted);
        assert_eq!(record.member_i64("id"), Some(3));
    }

    #[tokio::test]
    async fn delete_requires_primary_keys() {
        let db = MockDatabase::new("default");
        let mut record = Record::new(meta());
        let err = record.delete(&db).await.unwrap_err();
        assert!(matches!(err, OrmError::Empty { .. }));
    }

    #[tokio::test]
    async fn register_resolves_attached_children_before_the_find() {
        let db = MockDatabase::new("default");
        // Child find miss, child duplicate check, child insert id, then the
        // parent find hits on the now-populated owner key.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("total", DbValue::Int(0))])]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(21))])]);
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(7)),
            ("owner", DbValue::Int(21)),
        ])]);
        let owner_meta = Arc::new(
            ClassMeta::new("Gadget", "gadgets")
                .with_id("id")
                .with_column("owner", ColumnType::Object("Widget".to_string()))
                .with_has_one("owner", "Widget")
                .with_find_keys(vec!["owner".to_string()]),
        );
        let mut child = Record::new(meta());
        child.set_member("name", "gear");
        let mut parent = Record::new(owner_meta);
        parent.set_object("owner", child);
        let status = parent.register(&db).await.unwrap();
        assert_eq!(status, RegisterStatus::Exists);
        assert_eq!(parent.member_i64("id"), Some(7));
        assert_eq!(parent.member_i64("owner"), Some(21));
        let find = db
            .executed()
            .into_iter()
            .find(|sql| sql.contains("FROM gadgets"))
            .expect("the parent find ran");
        assert!(find.contains("X.owner = $1"), "{find}");
    }

    #[tokio::test]
    async fn attached_children_store_first() {
        let db = MockDatabase::new("default");
        // Child duplicate check, child insert id, parent insert id.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(21))])]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(42))])]);
        let owner_meta = Arc::new(
            ClassMeta::new("Gadget", "gadgets")
                .with_id("id")
                .with_column("owner", ColumnType::Object("Widget".to_string()))
                .with_has_one("owner", "Widget"),
        );
        let mut child = Record::new(meta());
        child.set_member("name", "gear");
        let mut parent = Record::new(owner_meta);
        parent.set_object("owner", child);
        parent.store(&db).await.unwrap();
        assert_eq!(parent.member_i64("owner"), Some(21));
        let executed = db.executed();
        let child_pos = executed.iter().position(|s| s.contains("INTO widgets"));
        let parent_pos = executed.iter().position(|s| s.contains("INTO gadgets"));
        assert!(child_pos < parent_pos);
    }
}
