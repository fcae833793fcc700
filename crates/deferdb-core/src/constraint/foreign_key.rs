//! Child-side foreign key checks.
//!
//! The child side of a foreign key always behaves as NO ACTION: a missing
//! parent key fails now when the foreign key is immediate and is recorded in
//! the ledger when it is deferred.

use std::collections::BTreeSet;

use super::context::TransactionContext;
use super::ledger::{DeferredEntry, DeferredOperation};
use crate::catalog::{ConstraintDef, SchemaBundle};
use crate::error::{ConstraintError, Error};
use crate::storage::{IndexKey, Transaction};
use crate::value::Value;

pub struct ForeignKeyChecker;

impl ForeignKeyChecker {
    /// Check one child key. Keys with a NULL component are never checked.
    pub fn check(
        def: &ConstraintDef,
        values: &[Value],
        operation: DeferredOperation,
        schema: &SchemaBundle,
        store: &Transaction<'_>,
        context: &mut TransactionContext,
    ) -> Result<(), Error> {
        let Some(key) = IndexKey::encode(values) else {
            return Ok(());
        };
        let Some(referenced) = def.referenced_constraint() else {
            return Ok(());
        };
        let parent = schema.require_constraint(referenced)?;
        context.write_set.record(def.id, &key);
        if let Some(handle) = parent.index {
            if store.index_contains(handle, &key)? {
                return Ok(());
            }
        }

        if context.is_deferred(def) {
            return context.defer(def, DeferredEntry::key(def.id, key, operation));
        }

        Err(ConstraintError::ForeignKeyViolation {
            constraint: def.name.clone(),
            table: schema.require_table(def.table)?.qualified_name(),
            referenced_table: schema.require_table(parent.table)?.qualified_name(),
            key: values.to_vec(),
        }
        .into())
    }
}

/// First child key with no matching referenced key.
///
/// Looks only at `hints` when given, otherwise at every distinct key in the
/// foreign key's index. A hinted key whose child rows are gone is not a
/// violation.
pub(crate) fn find_orphan(
    def: &ConstraintDef,
    hints: Option<&[IndexKey]>,
    schema: &SchemaBundle,
    store: &Transaction<'_>,
) -> Result<Option<IndexKey>, Error> {
    let (Some(handle), Some(referenced)) = (def.index, def.referenced_constraint()) else {
        return Ok(None);
    };
    let Some(parent_handle) = schema.require_constraint(referenced)?.index else {
        return Ok(None);
    };

    let candidates: Vec<IndexKey> = match hints {
        Some(keys) => keys.to_vec(),
        None => store
            .scan_index(handle)?
            .into_iter()
            .map(|(key, _)| key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    for key in candidates {
        if store.index_contains(handle, &key)? && !store.index_contains(parent_handle, &key)? {
            return Ok(Some(key));
        }
    }
    Ok(None)
}
