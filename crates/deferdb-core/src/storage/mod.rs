//! Storage primitives consumed by the constraint layer: committed rows and
//! index entries in sled, plus a per-transaction overlay.

mod engine;
pub mod key;
mod record;
mod transaction;

pub use engine::StorageEngine;
pub use key::{IndexKey, RowId};
pub use record::Record;
pub use transaction::{PreCommitHook, Savepoint, Transaction};

/// Value stored for index entries; the key carries all information.
pub(crate) const EMPTY_VALUE: &[u8] = &[];
