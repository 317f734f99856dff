//! SQL query builders
//!
//! Class-aware builders for SELECT/INSERT/UPDATE/DELETE. The writing
//! builders validate every assigned column against the declared valid set;
//! the select builder understands class relations and cross-database join
//! capabilities.

pub mod delete;
pub mod edit;
pub mod insert;
pub mod select;
pub mod types;
pub mod update;
pub mod where_clause;

pub use delete::DeleteQuery;
pub use edit::EditCore;
pub use insert::InsertQuery;
pub use select::SelectQuery;
pub use types::{Join, JoinKind, OrderDirection, QueryOperator};
pub use update::UpdateQuery;
pub use where_clause::{Condition, WhereClause};
