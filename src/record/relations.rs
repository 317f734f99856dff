//! Relation traversal: has_one, has_many, polymorphic narrowing

use std::sync::Arc;

use tracing::warn;

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassRegistry;
use crate::query::SelectQuery;
use crate::value::DbValue;

use super::Record;

impl Record {
    /// Resolve the far class name for a has_one member. Dynamic relations
    /// read the class from a sibling member at runtime.
    pub fn related_class(&self, member: &str) -> OrmResult<String> {
        let spec = self.meta().has_one(member).ok_or_else(|| {
            OrmError::Query(format!(
                "{}.{} is not a has_one member",
                self.class_name(),
                member
            ))
        })?;
        match &spec.dynamic_class_member {
            Some(class_member) => self.member_str(class_member).ok_or_else(|| {
                OrmError::Query(format!(
                    "{}.{} holds no class name for {}",
                    self.class_name(),
                    class_member,
                    member
                ))
            }),
            None => Ok(spec.class.clone()),
        }
    }

    /// Fetch the record a has_one member points at, caching it on this
    /// record. A null member yields `None`.
    ///
    /// A dangling key is an error unless broken-reference fixing is enabled,
    /// in which case the member is nulled out, persisted, and `None` returned.
    pub async fn related(
        &mut self,
        db: &dyn Database,
        registry: &ClassRegistry,
        member: &str,
    ) -> OrmResult<Option<&Record>> {
        if self.related_cache().contains_key(member) {
            return Ok(self.related_cache().get(member));
        }
        let key = self.member(member);
        if key.is_empty() {
            return Ok(None);
        }
        let class = self.related_class(member)?;
        let far_meta = registry.get(&class)?;
        let mut far = Record::with_id(far_meta, key.clone());
        match far.fetch(db).await {
            Ok(_) => {}
            Err(OrmError::NotFound { .. }) if self.fix_broken_references() => {
                warn!(
                    class = self.class_name(),
                    member,
                    key = %key.to_sql_literal(),
                    "clearing reference to a missing {}",
                    class
                );
                self.set_member(member, DbValue::Null);
                self.store(db).await?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        self.cache_related(member, far);
        Ok(self.related_cache().get(member))
    }

    /// Query selecting all far records of a has_many member
    pub fn related_query(
        &self,
        registry: &ClassRegistry,
        member: &str,
    ) -> OrmResult<SelectQuery> {
        let spec = self
            .meta()
            .has_many(member)
            .ok_or_else(|| {
                OrmError::Query(format!(
                    "{}.{} is not a has_many member",
                    self.class_name(),
                    member
                ))
            })?
            .clone();
        let far_meta = registry.get(&spec.class)?;
        let own_id = self.id();
        let mut query = SelectQuery::for_class(far_meta).filter(|w| {
            w.eq(&format!("X.{}", spec.foreign_key), own_id);
        });
        if let Some(order) = &spec.order_by {
            query = query.order_by(format!("X.{}", order), crate::query::OrderDirection::Asc);
        }
        Ok(query)
    }

    /// Fetch all far records of a has_many member
    pub async fn related_all(
        &self,
        db: &dyn Database,
        registry: &ClassRegistry,
        member: &str,
    ) -> OrmResult<Vec<Record>> {
        let query = self.related_query(registry, member)?;
        let far_meta = query
            .meta()
            .cloned()
            .ok_or_else(|| OrmError::Query("has_many query lost its class".to_string()))?;
        let rows = query.fetch_all(db).await?;
        Ok(rows
            .into_iter()
            .map(|row| Record::from_row(Arc::clone(&far_meta), row))
            .collect())
    }

    /// Narrow this record to the leaf class named by its polymorphic column.
    ///
    /// When no leaf applies, or the leaf class is unknown, the record is
    /// returned unchanged; an unknown leaf logs a warning rather than failing
    /// the fetch that produced it.
    pub fn polymorphic_child(self, registry: &ClassRegistry) -> Record {
        let Some(leaf) = self.polymorphic_leaf().map(str::to_string) else {
            return self;
        };
        if leaf == self.class_name() {
            return self;
        }
        let leaf_meta = match registry.get(&leaf) {
            Ok(meta) => meta,
            Err(_) => {
                warn!(
                    class = self.class_name(),
                    leaf, "polymorphic leaf class is not registered"
                );
                return self;
            }
        };
        let (members, original, status) = self.take_state();
        let mut narrowed = Record::new(leaf_meta);
        narrowed.restore_state(members, original, status);
        narrowed.set_is_new_cached(Some(false));
        narrowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, ColumnType, HasManySpec};
    use crate::testing::{row, MockDatabase};

    fn registry() -> ClassRegistry {
        let registry = ClassRegistry::new();
        registry
            .register(
                ClassMeta::new("Pet", "pets")
                    .with_id("id")
                    .with_column("owner", ColumnType::Object("Person".to_string()))
                    .with_column("name", ColumnType::Text)
                    .with_has_one("owner", "Person"),
            )
            .unwrap();
        registry
            .register(
                ClassMeta::new("Person", "people")
                    .with_id("id")
                    .with_column("name", ColumnType::Text)
                    .with_has_many(
                        "pets",
                        HasManySpec {
                            class: "Pet".to_string(),
                            foreign_key: "owner".to_string(),
                            order_by: Some("name".to_string()),
                        },
                    ),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn has_one_fetches_and_caches() {
        let registry = registry();
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(2)),
            ("name", DbValue::Text("ada".into())),
        ])]);
        let mut pet = Record::from_row(
            registry.get("Pet").unwrap(),
            row([("id", DbValue::Int(1)), ("owner", DbValue::Int(2))]),
        );
        let owner = pet.related(&db, &registry, "owner").await.unwrap().unwrap();
        assert_eq!(owner.member_str("name").as_deref(), Some("ada"));
        // Second call serves the cache; the queue is empty now.
        let again = pet.related(&db, &registry, "owner").await.unwrap();
        assert!(again.is_some());
        assert_eq!(db.executed().len(), 1);
    }

    #[tokio::test]
    async fn null_has_one_member_is_none() {
        let registry = registry();
        let db = MockDatabase::new("default");
        let mut pet = Record::from_row(
            registry.get("Pet").unwrap(),
            row([("id", DbValue::Int(1)), ("owner", DbValue::Null)]),
        );
        assert!(pet.related(&db, &registry, "owner").await.unwrap().is_none());
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn dangling_has_one_errors_by_default() {
        let registry = registry();
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![]);
        let mut pet = Record::from_row(
            registry.get("Pet").unwrap(),
            row([("id", DbValue::Int(1)), ("owner", DbValue::Int(99))]),
        );
        let err = pet.related(&db, &registry, "owner").await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound { .. }));
    }

    #[test]
    fn has_many_query_joins_on_the_foreign_key() {
        let registry = registry();
        let person = Record::from_row(
            registry.get("Person").unwrap(),
            row([("id", DbValue::Int(4))]),
        );
        let (sql, params) = person.related_query(&registry, "pets").unwrap().to_sql();
        assert!(sql.contains("FROM pets AS X"), "{sql}");
        assert!(sql.contains("X.owner = $1"), "{sql}");
        assert!(sql.ends_with("ORDER BY X.name ASC"), "{sql}");
        assert_eq!(params, vec![DbValue::Int(4)]);
    }
}
