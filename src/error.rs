//! Error types for the ORM core
//!
//! One crate-wide taxonomy covering database failures, schema synchronization,
//! query building, and the record lifecycle.

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error type for all ORM operations
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// Generic database or driver failure
    #[error("database error: {0}")]
    Database(String),

    /// The referenced table does not exist in the live database.
    ///
    /// Schema synchronization treats this as "create instead of alter".
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A unique or duplicate-key constraint was violated at the database level
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// No row matched a fetch/find for the given class
    #[error("{class}: record not found ({context})")]
    NotFound { class: String, context: String },

    /// A required value or primary key was missing
    #[error("{class}: {message}")]
    Empty { class: String, message: String },

    /// A record matching the class's duplicate keys already exists
    #[error("{class}: duplicate record ({message})")]
    Duplicate { class: String, message: String },

    /// Persistence failed for a reason other than duplication
    #[error("{class}: store failed: {message}")]
    Store {
        class: String,
        message: String,
        #[source]
        source: Option<Box<OrmError>>,
    },

    /// A timed wait (lock acquisition) expired
    #[error("timeout after {seconds}s: {message}")]
    Timeout { message: String, seconds: f64 },

    /// Schema definition or synchronization error
    #[error("schema error: {0}")]
    Schema(String),

    /// Query construction error (invalid column, unsupported join, ...)
    #[error("query error: {0}")]
    Query(String),

    /// Connection pool or configuration failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Invalid class metadata or module configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Value conversion / serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrmError {
    pub fn not_found(class: impl Into<String>, context: impl Into<String>) -> Self {
        OrmError::NotFound {
            class: class.into(),
            context: context.into(),
        }
    }

    pub fn empty(class: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::Empty {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn duplicate(class: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::Duplicate {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn store(
        class: impl Into<String>,
        message: impl Into<String>,
        source: Option<OrmError>,
    ) -> Self {
        OrmError::Store {
            class: class.into(),
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// True when the error means "the table is absent", not a real failure
    pub fn is_table_not_found(&self) -> bool {
        matches!(self, OrmError::TableNotFound(_))
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => OrmError::Database("row not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // undefined_table
                Some("42P01") => OrmError::TableNotFound(db.message().to_string()),
                // unique_violation
                Some("23505") => OrmError::UniqueViolation(db.message().to_string()),
                _ => OrmError::Database(db.message().to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                OrmError::Connection(err.to_string())
            }
            _ => OrmError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}
