//! Built-in model classes: locks, servers, settings, users
//!
//! Each model wraps a `Record` with typed accessors and the operations the
//! maintenance hooks call. The `*_class()` constructors build the metadata
//! (including declarative schemas) that `OrmModule::register_builtin_classes`
//! installs.

pub mod lock;
pub mod server;
pub mod settings;
pub mod user;

pub use lock::{Lock, ProcessStatus, SystemProcessStatus};
pub use server::Server;
pub use settings::Settings;
pub use user::User;

use serde_json::json;

use crate::meta::{ClassMeta, ColumnType};
use crate::schema::SchemaDefinition;
use crate::value::DbValue;

fn schema(value: serde_json::Value) -> SchemaDefinition {
    // The built-in schemas are static JSON; a parse failure is a programming
    // error caught by the tests below.
    SchemaDefinition::from_json(&value).unwrap_or_default()
}

pub fn lock_class() -> ClassMeta {
    ClassMeta::new("Lock", "locks")
        .with_id("id")
        .with_column("code", ColumnType::Text)
        .with_column("pid", ColumnType::Integer)
        .with_column("server", ColumnType::Object("Server".to_string()))
        .with_column("locked", ColumnType::Timestamp)
        .with_column("used", ColumnType::Modified)
        .with_has_one("server", "Server")
        .with_find_keys(vec!["code".to_string()])
        .with_duplicate_keys(vec!["code".to_string()])
        .with_schema(schema(json!({
            "columns": {
                "id": {"type": "id"},
                "code": {"type": "text", "not null": true},
                "pid": {"type": "integer"},
                "server": {"type": "integer"},
                "locked": {"type": "timestamp"},
                "used": {"type": "timestamp"}
            },
            "unique keys": {"code": ["code"]},
            "indexes": {"server": ["server"]}
        })))
}

pub fn server_class() -> ClassMeta {
    ClassMeta::new("Server", "servers")
        .with_id("id")
        .with_column("name", ColumnType::Text)
        .with_column("ip4_internal", ColumnType::Text)
        .with_column("ip4_external", ColumnType::Text)
        .with_column("alive", ColumnType::Timestamp)
        .with_find_keys(vec!["name".to_string()])
        .with_duplicate_keys(vec!["name".to_string()])
        .with_schema(schema(json!({
            "columns": {
                "id": {"type": "id"},
                "name": {"type": "text", "not null": true},
                "ip4_internal": {"type": "text"},
                "ip4_external": {"type": "text"},
                "alive": {"type": "timestamp"}
            },
            "unique keys": {"name": ["name"]}
        })))
}

pub fn settings_class() -> ClassMeta {
    ClassMeta::new("Settings", "settings")
        .with_column("name", ColumnType::Text)
        .with_column("value", ColumnType::Json)
        .with_primary_keys(vec!["name".to_string()])
        .with_find_keys(vec!["name".to_string()])
        .with_schema(schema(json!({
            "columns": {
                "name": {"type": "text", "not null": true},
                "value": {"type": "json"}
            },
            "primary keys": ["name"]
        })))
}

pub fn user_class() -> ClassMeta {
    ClassMeta::new("User", "users")
        .with_id("id")
        .with_column("email", ColumnType::Text)
        .with_column("password_hash", ColumnType::Text)
        .with_column("is_active", ColumnType::Boolean)
        .with_column("created", ColumnType::Created)
        .with_default("is_active", DbValue::Bool(true))
        .with_find_keys(vec!["email".to_string()])
        .with_duplicate_keys(vec!["email".to_string()])
        .with_schema(schema(json!({
            "columns": {
                "id": {"type": "id"},
                "email": {"type": "text", "not null": true},
                "password_hash": {"type": "text"},
                "is_active": {"type": "boolean"},
                "created": {"type": "timestamp"}
            },
            "unique keys": {"email": ["email"]}
        })))
}
