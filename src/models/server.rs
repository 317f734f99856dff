//! Fleet bookkeeping: one row per live host

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::backend::Database;
use crate::error::OrmResult;
use crate::meta::ClassMeta;
use crate::query::{DeleteQuery, SelectQuery, UpdateQuery};
use crate::record::Record;
use crate::value::DbValue;

/// Heartbeats older than this mean the server is gone
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 180;

/// This host's row in the `servers` table
pub struct Server {
    record: Record,
}

impl Server {
    /// Find or create the row for `hostname`, stamping its heartbeat
    pub async fn singleton(
        db: &dyn Database,
        meta: Arc<ClassMeta>,
        hostname: &str,
    ) -> OrmResult<Self> {
        let mut record = Record::new(meta);
        record.set_member("name", hostname);
        record.set_member("alive", DbValue::Timestamp(Utc::now()));
        record.register(db).await?;
        let mut server = Self { record };
        server.heartbeat(db).await?;
        Ok(server)
    }

    pub fn id(&self) -> Option<i64> {
        self.record.member_i64("id")
    }

    pub fn name(&self) -> String {
        self.record.member_str("name").unwrap_or_default()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Stamp this server's `alive` timestamp
    pub async fn heartbeat(&mut self, db: &dyn Database) -> OrmResult<()> {
        let now = Utc::now();
        self.record.set_member("alive", DbValue::Timestamp(now));
        if let Some(id) = self.id() {
            UpdateQuery::for_class(self.record.meta())
                .value("alive", DbValue::Timestamp(now))?
                .filter(|w| {
                    w.eq("id", id);
                })
                .execute(db)
                .await?;
            self.record.commit_member("alive");
        }
        Ok(())
    }

    /// Delete servers whose heartbeat is older than `timeout_seconds` and
    /// release any locks they still hold. Returns the number buried.
    pub async fn bury_dead_servers(
        db: &dyn Database,
        server_meta: &Arc<ClassMeta>,
        lock_meta: &Arc<ClassMeta>,
        timeout_seconds: i64,
    ) -> OrmResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(timeout_seconds.abs());
        let rows = SelectQuery::for_class(Arc::clone(server_meta))
            .filter(|w| {
                w.lte("X.alive", DbValue::Timestamp(cutoff));
            })
            .fetch_all(db)
            .await?;
        let mut buried = 0;
        for server_row in rows {
            let Some(id) = server_row.get_i64("id") else { continue };
            warn!(
                server = id,
                name = server_row.get_str("name").unwrap_or(""),
                "burying dead server"
            );
            UpdateQuery::for_class(lock_meta)
                .value("pid", DbValue::Null)?
                .value("server", DbValue::Null)?
                .value("locked", DbValue::Null)?
                .filter(|w| {
                    w.eq("server", id);
                })
                .execute(db)
                .await?;
            DeleteQuery::for_class(server_meta)
                .filter(|w| {
                    w.eq("id", id);
                })
                .execute(db)
                .await?;
            buried += 1;
        }
        Ok(buried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{lock_class, server_class};
    use crate::testing::{row, MockDatabase};

    #[tokio::test]
    async fn singleton_finds_the_existing_row() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(4)),
            ("name", DbValue::Text("web1".into())),
        ])]);
        let server = Server::singleton(&db, Arc::new(server_class()), "web1")
            .await
            .unwrap();
        assert_eq!(server.id(), Some(4));
        let heartbeat = db.executed().pop().unwrap();
        assert_eq!(heartbeat, "UPDATE servers SET alive = $1 WHERE id = $2");
    }

    #[tokio::test]
    async fn singleton_creates_a_missing_row() {
        let db = MockDatabase::new("default");
        // find miss, duplicate-check count, insert returning id.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("total", DbValue::Int(0))])]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(9))])]);
        let server = Server::singleton(&db, Arc::new(server_class()), "web2")
            .await
            .unwrap();
        assert_eq!(server.id(), Some(9));
        assert_eq!(server.name(), "web2");
        assert!(db
            .executed()
            .iter()
            .any(|sql| sql.starts_with("INSERT INTO servers")));
    }

    #[tokio::test]
    async fn burying_releases_locks_then_deletes() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(4)),
            ("name", DbValue::Text("web1".into())),
        ])]);
        let buried = Server::bury_dead_servers(
            &db,
            &Arc::new(server_class()),
            &Arc::new(lock_class()),
            DEFAULT_TIMEOUT_SECONDS,
        )
        .await
        .unwrap();
        assert_eq!(buried, 1);
        let executed = db.executed();
        let release = executed.iter().position(|s| s.starts_with("UPDATE locks"));
        let delete = executed
            .iter()
            .position(|s| s.starts_with("DELETE FROM servers"));
        assert!(release.is_some() && delete.is_some());
        assert!(release < delete);
    }

    #[tokio::test]
    async fn nothing_dead_means_nothing_buried() {
        let db = MockDatabase::new("default");
        let buried = Server::bury_dead_servers(
            &db,
            &Arc::new(server_class()),
            &Arc::new(lock_class()),
            DEFAULT_TIMEOUT_SECONDS,
        )
        .await
        .unwrap();
        assert_eq!(buried, 0);
    }
}
