//! Primary key and unique constraint checks.

use super::context::TransactionContext;
use super::ledger::{DeferredEntry, DeferredOperation};
use crate::catalog::{ConstraintDef, SchemaBundle};
use crate::error::{ConstraintError, Error};
use crate::storage::{IndexKey, Transaction};

/// Checks a written key against the constraint's own index.
///
/// The row carrying `key` is already in the index when this runs, so a
/// second entry under the same key is a duplicate.
pub struct UniquenessChecker;

impl UniquenessChecker {
    pub fn check(
        def: &ConstraintDef,
        key: &IndexKey,
        operation: DeferredOperation,
        schema: &SchemaBundle,
        store: &Transaction<'_>,
        context: &mut TransactionContext,
    ) -> Result<(), Error> {
        let Some(handle) = def.index else {
            return Ok(());
        };
        context.write_set.record(def.id, key);
        if store.index_rows(handle, key)?.len() <= 1 {
            return Ok(());
        }

        if context.is_deferred(def) {
            return context.defer(def, DeferredEntry::key(def.id, key.clone(), operation));
        }

        let table = schema.require_table(def.table)?;
        Err(ConstraintError::DuplicateKey {
            constraint: def.name.clone(),
            table: table.qualified_name(),
            key: key.values_lossy(),
        }
        .into())
    }
}

/// First duplicated key under a key constraint's index, scanning in key order.
pub(crate) fn find_duplicate(
    def: &ConstraintDef,
    store: &Transaction<'_>,
) -> Result<Option<IndexKey>, Error> {
    let Some(handle) = def.index else {
        return Ok(None);
    };
    let entries = store.scan_index(handle)?;
    Ok(entries
        .windows(2)
        .find(|pair| pair[0].0 == pair[1].0)
        .map(|pair| pair[0].0.clone()))
}
