//! # activerow: schema-synchronizing active records
//!
//! Database layer built around three pieces: a declarative schema DSL with a
//! diff engine that converges live tables toward their declarations, a
//! placeholder-safe query builder family (select, insert, update, delete),
//! and a dynamic active-record type driven by runtime class metadata.
//!
//! Concrete models for distributed locks, server fleet bookkeeping,
//! persisted settings, and users sit on top, wired together by `OrmModule`.

pub mod backend;
pub mod config;
pub mod dialect;
pub mod error;
pub mod meta;
pub mod models;
pub mod module;
pub mod postgres;
pub mod query;
pub mod record;
pub mod schema;
pub mod testing;
pub mod value;
pub mod walker;

// Re-export the core types
pub use backend::{Capability, Database, DatabaseRegistry, SqlRow};
pub use config::{DatabaseConfig, PoolConfig};
pub use dialect::{LogicalType, PostgresDialect, SqlDialect};
pub use error::{OrmError, OrmResult};
pub use meta::{ClassMeta, ClassRegistry, ColumnType, HasManySpec, HasOneSpec};
pub use module::OrmModule;
pub use postgres::PostgresDatabase;
pub use query::{DeleteQuery, InsertQuery, SelectQuery, UpdateQuery, WhereClause};
pub use record::{Record, RecordStatus, RegisterStatus};
pub use schema::{SchemaDefinition, Table};
pub use value::DbValue;
pub use walker::{JsonWalker, Walker};
