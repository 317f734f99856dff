//! Record graph serialization
//!
//! `Walker` turns a record and its relations into a `serde_json::Value`
//! tree. Traversal is bounded by depth and a cycle guard keyed on
//! (class, id); a record already on the path serializes as its scalar key
//! instead of recursing forever.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value as JsonValue};

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassRegistry;
use crate::record::Record;

#[derive(Clone)]
pub struct Walker {
    max_depth: usize,
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
    resolve_objects: bool,
    resolve_collections: bool,
    member_walkers: HashMap<String, Walker>,
}

impl Default for Walker {
    fn default() -> Self {
        Self {
            max_depth: 2,
            include: None,
            exclude: HashSet::new(),
            resolve_objects: true,
            resolve_collections: false,
            member_walkers: HashMap::new(),
        }
    }
}

impl Walker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Serialize only these members
    pub fn include<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(members.into_iter().map(Into::into).collect());
        self
    }

    /// Skip these members
    pub fn exclude<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = members.into_iter().map(Into::into).collect();
        self
    }

    /// Inline has_one relations as nested objects (scalar keys otherwise)
    pub fn resolve_objects(mut self, resolve: bool) -> Self {
        self.resolve_objects = resolve;
        self
    }

    /// Serialize has_many relations as arrays
    pub fn resolve_collections(mut self, resolve: bool) -> Self {
        self.resolve_collections = resolve;
        self
    }

    /// Use a different walker below the named member
    pub fn member_walker(mut self, member: impl Into<String>, walker: Walker) -> Self {
        self.member_walkers.insert(member.into(), walker);
        self
    }

    fn wants(&self, member: &str) -> bool {
        if self.exclude.contains(member) {
            return false;
        }
        match &self.include {
            Some(include) => include.contains(member),
            None => true,
        }
    }

    fn walker_for(&self, member: &str) -> &Walker {
        self.member_walkers.get(member).unwrap_or(self)
    }

    /// Serialize `record` and everything reachable within the depth bound
    pub async fn walk(
        &self,
        db: &dyn Database,
        registry: &ClassRegistry,
        record: &Record,
    ) -> OrmResult<JsonValue> {
        let mut seen = HashSet::new();
        self.walk_record(db, registry, record, 0, &mut seen).await
    }

    fn walk_record<'a>(
        &'a self,
        db: &'a dyn Database,
        registry: &'a ClassRegistry,
        record: &'a Record,
        depth: usize,
        seen: &'a mut HashSet<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = OrmResult<JsonValue>> + Send + 'a>> {
        Box::pin(async move {
            let key = (
                record.class_name().to_string(),
                record.id().to_sql_literal(),
            );
            seen.insert(key.clone());
            let mut object = Map::new();

            let columns: Vec<String> = record.meta().columns().map(str::to_string).collect();
            for column in columns {
                if !self.wants(&column) {
                    continue;
                }
                let value = record.member(&column);
                let is_relation = record.meta().has_one(&column).is_some();
                if is_relation
                    && self.resolve_objects
                    && depth < self.max_depth
                    && !value.is_empty()
                {
                    let class = record.related_class(&column)?;
                    let far_key = (class.clone(), value.to_sql_literal());
                    if seen.contains(&far_key) {
                        object.insert(column, value.to_json());
                        continue;
                    }
                    let far_meta = registry.get(&class)?;
                    let mut far = Record::with_id(far_meta, value.clone());
                    match far.fetch(db).await {
                        Ok(_) => {
                            let nested = self
                                .walker_for(&column)
                                .walk_record(db, registry, &far, depth + 1, seen)
                                .await?;
                            object.insert(column, nested);
                        }
                        // Dangling key: fall back to the scalar.
                        Err(OrmError::NotFound { .. }) => {
                            object.insert(column, value.to_json());
                        }
                        Err(err) => return Err(err),
                    }
                } else {
                    object.insert(column, value.to_json());
                }
            }

            if self.resolve_collections && depth < self.max_depth {
                let members: Vec<String> = record
                    .meta()
                    .has_many_members()
                    .map(|(member, _)| member.to_string())
                    .collect();
                for member in members {
                    if !self.wants(&member) {
                        continue;
                    }
                    let mut items = Vec::new();
                    for far in record.related_all(db, registry, &member).await? {
                        let far_key = (
                            far.class_name().to_string(),
                            far.id().to_sql_literal(),
                        );
                        if seen.contains(&far_key) {
                            items.push(far.id().to_json());
                            continue;
                        }
                        items.push(
                            self.walker_for(&member)
                                .walk_record(db, registry, &far, depth + 1, seen)
                                .await?,
                        );
                    }
                    object.insert(member, JsonValue::Array(items));
                }
            }

            seen.remove(&key);
            Ok(JsonValue::Object(object))
        })
    }
}

/// JSON-string rendering of a walk
pub struct JsonWalker {
    walker: Walker,
}

impl JsonWalker {
    pub fn new(walker: Walker) -> Self {
        Self { walker }
    }

    pub async fn render(
        &self,
        db: &dyn Database,
        registry: &ClassRegistry,
        record: &Record,
    ) -> OrmResult<String> {
        let value = self.walker.walk(db, registry, record).await?;
        Ok(serde_json::to_string(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, ColumnType, HasManySpec};
    use crate::testing::{row, MockDatabase};
    use crate::value::DbValue;
    use serde_json::json;

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
                            order_by: None,
                        },
                    ),
            )
            .unwrap();
        registry
    }

    fn pet(registry: &ClassRegistry) -> Record {
        Record::from_row(
            registry.get("Pet").unwrap(),
            row([
                ("id", DbValue::Int(1)),
                ("owner", DbValue::Int(2)),
                ("name", DbValue::Text("rex".into())),
            ]),
        )
    }

    #[tokio::test]
    async fn has_one_is_inlined_within_the_depth_bound() {
        let registry = registry();
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(2)),
            ("name", DbValue::Text("ada".into())),
        ])]);
        let value = Walker::new()
            .walk(&db, &registry, &pet(&registry))
            .await
            .unwrap();
        assert_eq!(value["name"], json!("rex"));
        assert_eq!(value["owner"]["name"], json!("ada"));
    }

    #[tokio::test]
    async fn depth_zero_keeps_scalars() {
        let registry = registry();
        let db = MockDatabase::new("default");
        let value = Walker::new()
            .max_depth(0)
            .walk(&db, &registry, &pet(&registry))
            .await
            .unwrap();
        assert_eq!(value["owner"], json!(2));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn include_limits_the_members() {
        let registry = registry();
        let db = MockDatabase::new("default");
        let value = Walker::new()
            .include(["name"])
            .walk(&db, &registry, &pet(&registry))
            .await
            .unwrap();
        assert_eq!(value, json!({"name": "rex"}));
    }

    #[tokio::test]
    async fn cycles_degrade_to_scalar_keys() {
        let registry = registry();
        let db = MockDatabase::new("default");
        // Owner row, then the owner's pets: the same pet pointing back.
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(2)),
            ("name", DbValue::Text("ada".into())),
        ])]);
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(1)),
            ("owner", DbValue::Int(2)),
            ("name", DbValue::Text("rex".into())),
        ])]);
        let value = Walker::new()
            .max_depth(3)
            .resolve_collections(true)
            .walk(&db, &registry, &pet(&registry))
            .await
            .unwrap();
        // The root pet is on the path, so the collection holds its key
        // instead of recursing back into it.
        assert_eq!(value["owner"]["pets"][0], json!(1));
    }

    #[tokio::test]
    async fn json_walker_renders_a_string() {
        let registry = registry();
        let db = MockDatabase::new("default");
        let text = JsonWalker::new(Walker::new().max_depth(0))
            .render(&db, &registry, &pet(&registry))
            .await
            .unwrap();
        assert!(text.contains("\"name\":\"rex\""), "{text}");
    }
}
