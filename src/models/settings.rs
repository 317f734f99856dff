//! Persisted global settings
//!
//! Settings are name/value rows where the value is JSON. Reads are served
//! from an in-memory cache; writes mark names dirty and `flush` persists
//! only those.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::backend::Database;
use crate::error::OrmResult;
use crate::meta::ClassMeta;
use crate::query::{InsertQuery, SelectQuery};
use crate::value::DbValue;

pub struct Settings {
    meta: Arc<ClassMeta>,
    cache: DashMap<String, JsonValue>,
    dirty: Mutex<HashSet<String>>,
}

impl Settings {
    pub fn new(meta: Arc<ClassMeta>) -> Self {
        Self {
            meta,
            cache: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Load every persisted setting into the cache
    pub async fn load(&self, db: &dyn Database) -> OrmResult<usize> {
        let rows = SelectQuery::for_class(Arc::clone(&self.meta))
            .fetch_all(db)
            .await?;
        let mut loaded = 0;
        for row in rows {
            let Some(name) = row.get_str("name").map(str::to_string) else {
                continue;
            };
            let value = row
                .get("value")
                .cloned()
                .unwrap_or(DbValue::Null)
                .to_json();
            self.cache.insert(name, value);
            loaded += 1;
        }
        debug!(loaded, "loaded settings");
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Option<JsonValue> {
        self.cache.get(name).map(|entry| entry.value().clone())
    }

    /// Set a value in the cache; an unchanged value does not mark the name
    /// dirty.
    pub fn set(&self, name: &str, value: JsonValue) {
        if self.cache.get(name).map(|e| e.value() == &value) == Some(true) {
            return;
        }
        self.cache.insert(name.to_string(), value);
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert(name.to_string());
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.lock().map(|d| !d.is_empty()).unwrap_or(false)
    }

    /// Persist dirty names as upserts. Clean settings never touch the
    /// database.
    pub async fn flush(&self, db: &dyn Database) -> OrmResult<usize> {
        let names: Vec<String> = match self.dirty.lock() {
            Ok(mut dirty) => dirty.drain().collect(),
            Err(_) => return Ok(0),
        };
        let mut written = 0;
        for name in names {
            let Some(value) = self.get(&name) else { continue };
            InsertQuery::for_class(&self.meta)
                .value("name", name.as_str())?
                .value("value", DbValue::Json(value))?
                .upsert(vec!["name".to_string()])
                .execute(db)
                .await?;
            written += 1;
        }
        if written > 0 {
            debug!(written, "flushed settings");
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings_class;
    use crate::testing::{row, MockDatabase};
    use serde_json::json;

    fn settings() -> Settings {
        Settings::new(Arc::new(settings_class()))
    }

    #[tokio::test]
    async fn load_populates_the_cache() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![
            row([
                ("name", DbValue::Text("site.title".into())),
                ("value", DbValue::Json(json!("Hello"))),
            ]),
            row([
                ("name", DbValue::Text("site.limit".into())),
                ("value", DbValue::Json(json!(25))),
            ]),
        ]);
        let settings = settings();
        assert_eq!(settings.load(&db).await.unwrap(), 2);
        assert_eq!(settings.get("site.title"), Some(json!("Hello")));
        assert_eq!(settings.get("site.limit"), Some(json!(25)));
    }

    #[tokio::test]
    async fn flush_writes_only_dirty_names() {
        let db = MockDatabase::new("default");
        let settings = settings();
        settings.set("a", json!(1));
        settings.set("b", json!(2));
        assert_eq!(settings.flush(&db).await.unwrap(), 2);
        assert!(!settings.is_dirty());
        for sql in db.executed() {
            assert!(
                sql.contains("ON CONFLICT (name) DO UPDATE"),
                "{sql}"
            );
        }
        // A second flush with nothing dirty writes nothing.
        assert_eq!(settings.flush(&db).await.unwrap(), 0);
        assert_eq!(db.executed().len(), 2);
    }

    #[test]
    fn unchanged_set_stays_clean() {
        let settings = settings();
        settings.set("a", json!(1));
        settings.dirty.lock().unwrap().clear();
        settings.set("a", json!(1));
        assert!(!settings.is_dirty());
    }
}
