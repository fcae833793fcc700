//! Constraint registry.
//!
//! The catalog stores table and constraint metadata in versioned schema bundles.

mod catalog;
mod constraint;
mod ddl;
mod schema;
mod table;

pub use catalog::Catalog;
pub use constraint::{
    Characteristics, ConstraintDef, ConstraintId, ConstraintKind, IndexHandle, KeyChangeKind,
    ReferentialAction,
};
pub use ddl::{ColumnSpec, ConstraintSpec, ConstraintSpecKind, TableSpec};
pub use schema::SchemaBundle;
pub use table::{normalize_ident, ColumnDef, ColumnType, TableDef, TableId, DEFAULT_SCHEMA};
