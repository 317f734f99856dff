//! ORM module wiring
//!
//! `OrmModule` owns the class and database registries, builds records by
//! class name, synchronizes every declarative schema, and exposes the
//! cluster maintenance entry points cron runners call.

use std::sync::Arc;

use tracing::{error, info};

use crate::backend::{Database, DatabaseRegistry};
use crate::error::OrmResult;
use crate::meta::{ClassMeta, ClassRegistry};
use crate::models::{
    self, Lock, ProcessStatus, Server, SystemProcessStatus,
};
use crate::record::Record;
use crate::schema;

pub struct OrmModule {
    classes: ClassRegistry,
    databases: DatabaseRegistry,
    process: Arc<dyn ProcessStatus>,
    hostname: String,
}

impl OrmModule {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            classes: ClassRegistry::new(),
            databases: DatabaseRegistry::new(),
            process: Arc::new(SystemProcessStatus),
            hostname: hostname.into(),
        }
    }

    pub fn with_process_status(mut self, process: Arc<dyn ProcessStatus>) -> Self {
        self.process = process;
        self
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn databases(&self) -> &DatabaseRegistry {
        &self.databases
    }

    pub fn register_database(&self, database: Arc<dyn Database>) {
        self.databases.register(database);
    }

    pub fn register_class(&self, meta: ClassMeta) -> OrmResult<Arc<ClassMeta>> {
        self.classes.register(meta)
    }

    /// Install the lock, server, settings, and user classes
    pub fn register_builtin_classes(&self) -> OrmResult<()> {
        self.classes.register(models::lock_class())?;
        self.classes.register(models::server_class())?;
        self.classes.register(models::settings_class())?;
        self.classes.register(models::user_class())?;
        Ok(())
    }

    /// New empty record for a registered class
    pub fn record(&self, class: &str) -> OrmResult<Record> {
        Ok(Record::new(self.classes.get(class)?))
    }

    fn database_for(&self, meta: &ClassMeta) -> OrmResult<Arc<dyn Database>> {
        self.databases.get(meta.database())
    }

    /// Diff every registered declarative schema against its live database.
    ///
    /// Returns the statements per class. With `apply` false nothing
    /// executes; this is the dry-run surface.
    pub async fn synchronize_schemas(
        &self,
        apply: bool,
    ) -> OrmResult<Vec<(String, Vec<String>)>> {
        let mut results = Vec::new();
        for name in self.classes.names() {
            let meta = self.classes.get(&name)?;
            let Some(definition) = meta.schema() else { continue };
            let db = self.database_for(&meta)?;
            let statements =
                schema::synchronize_definition(db.as_ref(), meta.table(), definition, apply)
                    .await?;
            if !statements.is_empty() {
                info!(
                    class = %name,
                    statements = statements.len(),
                    applied = apply,
                    "schema out of sync"
                );
            }
            results.push((name, statements));
        }
        Ok(results)
    }

    async fn lock_and_server_meta(
        &self,
    ) -> OrmResult<(Arc<ClassMeta>, Arc<ClassMeta>, Arc<dyn Database>)> {
        let lock_meta = self.classes.get("Lock")?;
        let server_meta = self.classes.get("Server")?;
        let db = self.database_for(&lock_meta)?;
        Ok((lock_meta, server_meta, db))
    }

    /// Acquire a named lock on the lock class's database
    pub async fn lock(&self, code: &str) -> OrmResult<Lock> {
        let (lock_meta, _, db) = self.lock_and_server_meta().await?;
        let server = Server::singleton(db.as_ref(), self.classes.get("Server")?, &self.hostname)
            .await?;
        let server_id = server.id().unwrap_or(0);
        Lock::registered(
            db.as_ref(),
            lock_meta,
            code,
            server_id,
            Arc::clone(&self.process),
        )
        .await
    }

    /// Per-minute cluster maintenance: heartbeat, then release locks held
    /// by dead processes or defunct servers.
    pub async fn cluster_minute(&self) -> OrmResult<()> {
        let (lock_meta, server_meta, db) = self.lock_and_server_meta().await?;
        let server =
            Server::singleton(db.as_ref(), Arc::clone(&server_meta), &self.hostname).await?;
        let lock = Lock::registered(
            db.as_ref(),
            Arc::clone(&lock_meta),
            "cluster_minute",
            server.id().unwrap_or(0),
            Arc::clone(&self.process),
        )
        .await?;
        lock.delete_dead_processes(db.as_ref()).await?;
        Lock::delete_dangling(db.as_ref(), &lock_meta, &server_meta).await?;
        Ok(())
    }

    /// Hourly cluster maintenance: cull stale locks and dead servers
    pub async fn cluster_hour(&self) -> OrmResult<()> {
        let (lock_meta, server_meta, db) = self.lock_and_server_meta().await?;
        if let Err(err) = Lock::delete_unused(db.as_ref(), &lock_meta).await {
            if !err.is_table_not_found() {
                return Err(err);
            }
            error!(%err, "lock table missing during maintenance");
        }
        Server::bury_dead_servers(
            db.as_ref(),
            &server_meta,
            &lock_meta,
            models::server::DEFAULT_TIMEOUT_SECONDS,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDatabase;
    use crate::value::DbValue;

    fn module_with_mock() -> (OrmModule, Arc<MockDatabase>) {
        let module = OrmModule::new("web1");
        module.register_builtin_classes().unwrap();
        let db = Arc::new(MockDatabase::new("default"));
        module.register_database(Arc::clone(&db) as Arc<dyn Database>);
        (module, db)
    }

    #[tokio::test]
    async fn record_factory_uses_registered_metadata() {
        let (module, _db) = module_with_mock();
        let record = module.record("User").unwrap();
        assert_eq!(record.class_name(), "User");
        assert_eq!(record.member("is_active"), DbValue::Bool(true));
        assert!(module.record("Nope").is_err());
    }

    #[tokio::test]
    async fn missing_tables_synchronize_to_creates() {
        let (module, db) = module_with_mock();
        let results = module.synchronize_schemas(false).await.unwrap();
        assert_eq!(results.len(), 4);
        for (class, statements) in &results {
            assert!(
                statements.iter().any(|sql| sql.starts_with("CREATE TABLE")),
                "{class} creates its table"
            );
        }
        // Dry run: nothing executed.
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn in_sync_tables_produce_no_statements() {
        let (module, db) = module_with_mock();
        let dialect = crate::dialect::PostgresDialect;
        for name in module.classes().names() {
            let meta = module.classes().get(&name).unwrap();
            let table = meta
                .schema()
                .unwrap()
                .to_table(meta.table(), &dialect)
                .unwrap();
            db.define_table(table);
        }
        let results = module.synchronize_schemas(true).await.unwrap();
        for (class, statements) in &results {
            assert!(statements.is_empty(), "{class}: {statements:?}");
        }
    }

    #[tokio::test]
    async fn apply_executes_the_creates() {
        let (module, db) = module_with_mock();
        // Everything but the locks table already exists.
        let dialect = crate::dialect::PostgresDialect;
        for name in ["Server", "Settings", "User"] {
            let meta = module.classes().get(name).unwrap();
            let table = meta
                .schema()
                .unwrap()
                .to_table(meta.table(), &dialect)
                .unwrap();
            db.define_table(table);
        }
        module.synchronize_schemas(true).await.unwrap();
        assert!(db
            .executed()
            .iter()
            .any(|sql| sql.starts_with("CREATE TABLE locks")));
    }

    #[tokio::test]
    async fn cluster_hour_culls_stale_locks_and_servers() {
        let (module, db) = module_with_mock();
        module.cluster_hour().await.unwrap();
        let executed = db.executed();
        assert!(
            executed.iter().any(|sql| sql.starts_with("DELETE FROM locks")),
            "{executed:?}"
        );
    }

    #[tokio::test]
    async fn cluster_minute_registers_this_server_first() {
        use crate::testing::row;
        let (module, db) = module_with_mock();
        // Server find miss, duplicate check, insert returning id, then the
        // lock row for the maintenance lock.
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![]);
        db.push_fetch_rows(vec![row([("id", DbValue::Int(9))])]);
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(1)),
            ("code", DbValue::Text("cluster_minute".into())),
        ])]);
        module.cluster_minute().await.unwrap();
        assert!(db
            .executed()
            .iter()
            .any(|sql| sql.starts_with("INSERT INTO servers")));
    }
}
