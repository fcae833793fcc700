//! Referenced-side foreign key checks.
//!
//! Runs when a primary key or unique key value disappears from its table,
//! through a delete or a key update. A key that still has a surviving row
//! (possible while duplicates are deferred) needs no action.

use std::collections::BTreeMap;

use tracing::debug;

use super::actions::{ActionRequest, InlineAction, KeyChange};
use super::context::TransactionContext;
use super::ledger::{DeferredEntry, DeferredOperation};
use crate::catalog::{ConstraintDef, ConstraintId, KeyChangeKind, ReferentialAction, SchemaBundle};
use crate::error::{ConstraintError, Error};
use crate::storage::{IndexKey, Transaction};

#[derive(Debug, Clone)]
struct PendingKey {
    change: KeyChange,
    operation: DeferredOperation,
    depth: usize,
}

/// Two-phase referenced-key checker for one statement.
///
/// `do_check` resolves a removed key at once, unless the key constraint is
/// currently deferred: then the key is held until `post_check` at the end
/// of the statement, when every duplicate that will survive the statement is
/// in place.
#[derive(Debug, Default)]
pub struct ReferencedKeyChecker {
    pending: BTreeMap<(ConstraintId, IndexKey), PendingKey>,
}

impl ReferencedKeyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether keys are waiting for `post_check`.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn do_check(
        &mut self,
        key_def: &ConstraintDef,
        key: IndexKey,
        change: KeyChange,
        operation: DeferredOperation,
        depth: usize,
        schema: &SchemaBundle,
        store: &Transaction<'_>,
        context: &mut TransactionContext,
    ) -> Result<Vec<ActionRequest>, Error> {
        if schema.referencing(key_def.id).next().is_none() {
            return Ok(Vec::new());
        }

        if context.is_deferred(key_def) {
            self.pending.insert(
                (key_def.id, key),
                PendingKey {
                    change,
                    operation,
                    depth,
                },
            );
            return Ok(Vec::new());
        }

        resolve(key_def, &key, &change, operation, depth, schema, store, context)
    }

    /// Resolve every held key, in constraint then key order.
    pub fn post_check(
        &mut self,
        schema: &SchemaBundle,
        store: &Transaction<'_>,
        context: &mut TransactionContext,
    ) -> Result<Vec<ActionRequest>, Error> {
        let pending = std::mem::take(&mut self.pending);
        let mut requests = Vec::new();
        for ((id, key), held) in pending {
            // the key constraint may have been dropped by a later statement
            let Some(key_def) = schema.constraint(id) else {
                continue;
            };
            requests.extend(resolve(
                key_def,
                &key,
                &held.change,
                held.operation,
                held.depth,
                schema,
                store,
                context,
            )?);
        }
        Ok(requests)
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    key_def: &ConstraintDef,
    key: &IndexKey,
    change: &KeyChange,
    operation: DeferredOperation,
    depth: usize,
    schema: &SchemaBundle,
    store: &Transaction<'_>,
    context: &mut TransactionContext,
) -> Result<Vec<ActionRequest>, Error> {
    let Some(handle) = key_def.index else {
        return Ok(Vec::new());
    };
    // a child may be committed under this key by another session
    for fk in schema.referencing(key_def.id) {
        context.write_set.record(fk.id, key);
    }
    if store.index_contains(handle, key)? {
        debug!(constraint = %key_def.name, "referenced key survives");
        return Ok(Vec::new());
    }

    let kind = match change {
        KeyChange::Delete => KeyChangeKind::Delete,
        KeyChange::Update(_) => KeyChangeKind::Update,
    };

    let mut requests = Vec::new();
    for fk in schema.referencing(key_def.id) {
        let Some(fk_handle) = fk.index else {
            continue;
        };
        if !store.index_contains(fk_handle, key)? {
            continue;
        }

        let action = fk.action_for(kind);
        match action {
            ReferentialAction::Restrict => {
                return Err(violation(fk, key_def, key, action, schema)?);
            }
            ReferentialAction::NoAction => {
                if context.is_deferred(fk) {
                    context.defer(fk, DeferredEntry::key(fk.id, key.clone(), operation))?;
                } else {
                    return Err(violation(fk, key_def, key, action, schema)?);
                }
            }
            ReferentialAction::Cascade | ReferentialAction::SetNull => {
                requests.push(ActionRequest {
                    foreign_key: fk.id,
                    key: key.clone(),
                    change: change.clone(),
                    action: if action == ReferentialAction::Cascade {
                        InlineAction::Cascade
                    } else {
                        InlineAction::SetNull
                    },
                    depth: depth + 1,
                });
            }
        }
    }
    Ok(requests)
}

fn violation(
    fk: &ConstraintDef,
    key_def: &ConstraintDef,
    key: &IndexKey,
    action: ReferentialAction,
    schema: &SchemaBundle,
) -> Result<Error, Error> {
    Ok(ConstraintError::ReferencedKeyViolation {
        constraint: fk.name.clone(),
        table: schema.require_table(fk.table)?.qualified_name(),
        referenced_table: schema.require_table(key_def.table)?.qualified_name(),
        key: key.values_lossy(),
        action,
    }
    .into())
}
