//! Schema model and synchronization
//!
//! Physical table/column/index value objects, the declarative schema DSL,
//! and the diff engine that reconciles live structure with declared.

pub mod column;
pub mod definition;
pub mod diff;
pub mod index;
pub mod table;

pub use column::Column;
pub use definition::{ColumnSpec, SchemaDefinition};
pub use diff::{diff, synchronize, synchronize_definition, update, ChangeSet};
pub use index::{Index, IndexKind, PRIMARY_INDEX_NAME};
pub use table::{Table, TableOptions};
