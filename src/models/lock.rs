//! Row-based distributed locks
//!
//! A lock is one row in the `locks` table. Ownership is a (server, pid)
//! pair; acquisition is a single conditional UPDATE so there is at most one
//! winner per free lock regardless of how many processes race for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::query::{DeleteQuery, SelectQuery, UpdateQuery};
use crate::record::Record;
use crate::value::DbValue;

/// How long a lock's `locked` timestamp may sit untouched before its owning
/// process is suspected dead.
pub const DEFAULT_DEAD_SECONDS: i64 = 100;

const DEFAULT_SLEEP_SECONDS: f64 = 0.5;

/// Seam for asking whether a pid on this host is alive
pub trait ProcessStatus: Send + Sync {
    fn current_pid(&self) -> i64;
    fn alive(&self, pid: i64) -> bool;
}

/// Live answers from the local process table
pub struct SystemProcessStatus;

impl ProcessStatus for SystemProcessStatus {
    fn current_pid(&self) -> i64 {
        std::process::id() as i64
    }

    fn alive(&self, pid: i64) -> bool {
        if pid <= 0 {
            return false;
        }
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }
}

/// A named cross-process lock
pub struct Lock {
    record: Record,
    server_id: i64,
    process: Arc<dyn ProcessStatus>,
    sleep_seconds: f64,
}

impl Lock {
    /// Find or create the lock row for `code`
    pub async fn registered(
        db: &dyn Database,
        meta: Arc<ClassMeta>,
        code: &str,
        server_id: i64,
        process: Arc<dyn ProcessStatus>,
    ) -> OrmResult<Self> {
        let mut record = Record::new(meta);
        record.set_member("code", code);
        match record.register(db).await {
            Ok(_) => {}
            // Another process created it between our find and store.
            Err(OrmError::Duplicate { .. }) => {
                if !record.find(db).await? {
                    return Err(OrmError::not_found("Lock", code));
                }
            }
            Err(err) => return Err(err),
        }
        Ok(Self {
            record,
            server_id,
            process,
            sleep_seconds: DEFAULT_SLEEP_SECONDS,
        })
    }

    pub fn set_sleep_seconds(&mut self, seconds: f64) {
        self.sleep_seconds = seconds;
    }

    pub fn code(&self) -> String {
        self.record.member_str("code").unwrap_or_default()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    fn pid(&self) -> Option<i64> {
        self.record.member_i64("pid")
    }

    fn is_free(&self) -> bool {
        self.record.member_is_empty("pid") && self.record.member_is_empty("server")
    }

    fn is_my_server(&self) -> bool {
        self.record.member_i64("server") == Some(self.server_id)
    }

    fn is_my_pid(&self) -> bool {
        self.pid() == Some(self.process.current_pid())
    }

    /// Held by this process right now?
    pub fn is_mine(&self) -> bool {
        self.is_my_server() && self.is_my_pid()
    }

    /// Held by anyone, as far as the local row shows?
    pub fn is_locked(&self) -> bool {
        !self.is_free() && !self.is_mine()
    }

    /// Acquire the lock.
    ///
    /// `timeout` semantics: already held by this process is always an
    /// immediate success. Zero makes one optimistic attempt and returns
    /// whether it won. Negative is a `Timeout` error. Positive polls,
    /// clearing dead-process locks on the first pass, until the lock is won
    /// or `timeout` seconds elapse.
    pub async fn acquire(&mut self, db: &dyn Database, timeout: f64) -> OrmResult<bool> {
        if self.is_mine() {
            return Ok(true);
        }
        if self.is_my_server() && !self.pid().map_or(false, |pid| self.process.alive(pid)) {
            return self.acquire_dead(db).await;
        }
        if timeout == 0.0 {
            return self.acquire_once(db).await;
        }
        if timeout < 0.0 {
            return Err(OrmError::Timeout {
                message: format!("acquire timeout is negative for lock '{}'", self.code()),
                seconds: timeout,
            });
        }
        self.acquire_polling(db, timeout).await
    }

    async fn acquire_polling(&mut self, db: &dyn Database, timeout: f64) -> OrmResult<bool> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout);
        let sleep = self.sleep_seconds.min(timeout);
        let mut first = true;
        loop {
            if first {
                first = false;
                self.delete_dead_processes(db).await?;
            } else {
                // Jitter the poll interval so racing waiters spread out.
                let jitter = 1.0 + 0.25 * rand::random::<f64>();
                tokio::time::sleep(Duration::from_secs_f64(sleep * jitter)).await;
            }
            self.record.fetch(db).await?;
            if self.is_mine() {
                return Ok(true);
            }
            if self.is_free() && self.acquire_once(db).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Err(OrmError::Timeout {
                    message: format!("waiting for lock '{}'", self.code()),
                    seconds: timeout,
                });
            }
        }
    }

    /// One conditional UPDATE; wins only when nobody holds the row
    async fn acquire_once(&mut self, db: &dyn Database) -> OrmResult<bool> {
        self.acquire_where(db, |w| {
            w.is_null("pid");
        })
        .await
    }

    /// Steal a lock whose owner on this server is dead. The previous owner
    /// must not change between our check and the UPDATE.
    async fn acquire_dead(&mut self, db: &dyn Database) -> OrmResult<bool> {
        let pid = self.record.member("pid");
        let server = self.record.member("server");
        self.acquire_where(db, move |w| {
            w.eq("pid", pid).eq("server", server);
        })
        .await
    }

    async fn acquire_where(
        &mut self,
        db: &dyn Database,
        condition: impl FnOnce(&mut crate::query::WhereClause),
    ) -> OrmResult<bool> {
        let now = Utc::now();
        let pid = self.process.current_pid();
        let id = self.record.id();
        let affected = UpdateQuery::for_class(self.record.meta())
            .value("pid", pid)?
            .value("server", self.server_id)?
            .value("locked", DbValue::Timestamp(now))?
            .value("used", DbValue::Timestamp(now))?
            .filter(|w| {
                w.eq("id", id);
                condition(w);
            })
            .execute(db)
            .await?;
        if affected == 1 {
            self.record.set_member("pid", pid);
            self.record.set_member("server", self.server_id);
            self.record.set_member("locked", DbValue::Timestamp(now));
            self.record.set_member("used", DbValue::Timestamp(now));
            self.record.commit_members();
            debug!(code = %self.code(), "acquired lock");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Force the lock open regardless of owner
    pub async fn crack(&mut self, db: &dyn Database) -> OrmResult<()> {
        self.release(db).await
    }

    /// Release this lock
    pub async fn release(&mut self, db: &dyn Database) -> OrmResult<()> {
        let id = self.record.id();
        UpdateQuery::for_class(self.record.meta())
            .value("pid", DbValue::Null)?
            .value("server", DbValue::Null)?
            .value("locked", DbValue::Null)?
            .filter(|w| {
                w.eq("id", id);
            })
            .execute(db)
            .await?;
        self.record.set_member("pid", DbValue::Null);
        self.record.set_member("server", DbValue::Null);
        self.record.set_member("locked", DbValue::Null);
        self.record.commit_members();
        debug!(code = %self.code(), "released lock");
        Ok(())
    }

    /// Release every lock held by (server, pid); process shutdown hook
    pub async fn release_all(
        db: &dyn Database,
        meta: &ClassMeta,
        server_id: i64,
        pid: i64,
    ) -> OrmResult<u64> {
        UpdateQuery::for_class(meta)
            .value("pid", DbValue::Null)?
            .value("server", DbValue::Null)?
            .value("locked", DbValue::Null)?
            .filter(|w| {
                w.eq("pid", pid).eq("server", server_id);
            })
            .execute(db)
            .await
    }

    /// Delete free locks untouched for a day; hourly maintenance
    pub async fn delete_unused(db: &dyn Database, meta: &ClassMeta) -> OrmResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(1);
        let deleted = DeleteQuery::for_class(meta)
            .filter(|w| {
                w.lte("used", DbValue::Timestamp(cutoff))
                    .is_null("pid")
                    .is_null("server");
            })
            .execute(db)
            .await?;
        if deleted > 0 {
            debug!(deleted, "deleted unused locks");
        }
        Ok(deleted)
    }

    /// Release locks pointing at servers that no longer exist
    pub async fn delete_dangling(
        db: &dyn Database,
        lock_meta: &Arc<ClassMeta>,
        server_meta: &Arc<ClassMeta>,
    ) -> OrmResult<u64> {
        let server_rows = SelectQuery::for_class(Arc::clone(server_meta))
            .fetch_all(db)
            .await?;
        let server_ids: Vec<DbValue> = server_rows
            .iter()
            .filter_map(|row| row.get_i64("id"))
            .map(DbValue::Int)
            .collect();
        if server_ids.is_empty() {
            return Ok(0);
        }
        let released = UpdateQuery::for_class(lock_meta)
            .value("pid", DbValue::Null)?
            .value("server", DbValue::Null)?
            .value("locked", DbValue::Null)?
            .filter(|w| {
                w.is_not_null("server");
                w.not_in("server", server_ids);
            })
            .execute(db)
            .await?;
        if released > 0 {
            warn!(released, "released locks owned by defunct servers");
        }
        Ok(released)
    }

    /// Release locks on this server whose owning process is dead
    pub async fn delete_dead_processes(&self, db: &dyn Database) -> OrmResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(DEFAULT_DEAD_SECONDS);
        let rows = SelectQuery::for_class(Arc::clone(self.record.meta()))
            .filter(|w| {
                w.eq("X.server", self.server_id)
                    .lte("X.locked", DbValue::Timestamp(cutoff));
            })
            .fetch_all(db)
            .await?;
        let mut released = 0;
        for row in rows {
            let pid = row.get_i64("pid").unwrap_or(0);
            if self.process.alive(pid) {
                continue;
            }
            let Some(id) = row.get_i64("id") else { continue };
            warn!(
                lock = id,
                pid, "releasing lock held by a dead process"
            );
            UpdateQuery::for_class(self.record.meta())
                .value("pid", DbValue::Null)?
                .value("server", DbValue::Null)?
                .value("locked", DbValue::Null)?
                .filter(|w| {
                    w.eq("id", id);
                })
                .execute(db)
                .await?;
            released += 1;
        }
        Ok(released)
    }
}
