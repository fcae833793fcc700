//! deferdb core - deferrable constraint enforcement over a sled-backed row store.
//!
//! Primary key, unique, foreign key and check constraints may be declared
//! `DEFERRABLE`, switched between IMMEDIATE and DEFERRED per transaction with
//! `SET CONSTRAINTS`, and are re-validated structurally before commit.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod constraint;
pub mod database;
pub mod dml;
pub mod error;
pub mod expr;
pub mod session;
pub mod storage;
pub mod value;

pub use catalog::{
    Catalog, Characteristics, ColumnSpec, ColumnType, ConstraintDef, ConstraintKind,
    ConstraintSpec, ReferentialAction, SchemaBundle, TableDef, TableSpec,
};
pub use config::{ConstraintConfig, EngineConfig};
pub use constraint::{
    ConstraintMode, ConstraintTarget, DeferredLedger, DeferredOperation, RowProcessing,
    SetConstraints,
};
pub use database::Database;
pub use dml::{Assignment, ImportMode, ImportSummary};
pub use error::{CatalogError, ConstraintError, Error, ErrorScope, ViolationKind};
pub use session::Session;
pub use storage::{StorageEngine, Transaction};
pub use value::Value;
