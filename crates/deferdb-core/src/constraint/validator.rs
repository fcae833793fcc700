//! Structural re-validation of deferred constraints.
//!
//! Deferred work is re-checked against the indexes and table rows as they
//! stand, never against what was recorded when the work was deferred. Work
//! that later statements made moot (the duplicate was deleted, the orphan
//! got its parent) does not fail.
//!
//! At commit the keys in the transaction's [`WriteSet`] are examined too, so
//! rows committed by other sessions since a statement's checks cannot leave a
//! duplicate or an orphan behind.

use tracing::{debug, info, warn};

use super::check::find_failing_row;
use super::foreign_key::find_orphan;
use super::ledger::DeferredLedger;
use super::uniqueness::find_duplicate;
use super::write_set::WriteSet;
use crate::catalog::{ConstraintDef, ConstraintId, ConstraintKind, SchemaBundle};
use crate::error::{ConstraintError, Error, ErrorScope, ViolationKind};
use crate::storage::{IndexKey, PreCommitHook, Transaction};
use crate::value::Value;

/// Read-only validator over a transaction's visible state.
pub struct ConstraintValidator<'a, 'db> {
    schema: &'a SchemaBundle,
    store: &'a Transaction<'db>,
}

impl<'a, 'db> ConstraintValidator<'a, 'db> {
    pub fn new(schema: &'a SchemaBundle, store: &'a Transaction<'db>) -> Self {
        Self { schema, store }
    }

    /// Validate every constraint in the ledger, in ascending id order.
    ///
    /// Stops at the first violation.
    pub fn validate_ledger(&self, ledger: &DeferredLedger, scope: ErrorScope) -> Result<(), Error> {
        for id in ledger.constraints() {
            self.validate_deferred(id, ledger, scope)?;
        }
        Ok(())
    }

    /// Validate one constraint's deferred work.
    pub fn validate_deferred(
        &self,
        id: ConstraintId,
        ledger: &DeferredLedger,
        scope: ErrorScope,
    ) -> Result<(), Error> {
        // dropped constraints carry no obligations
        let Some(def) = self.schema.constraint(id) else {
            return Ok(());
        };
        debug!(constraint = %def.name, %scope, "validating deferred constraint");

        match &def.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                if let Some(key) = find_duplicate(def, self.store)? {
                    return Err(self.deferred(def, ViolationKind::Duplicate, scope, key.values_lossy())?);
                }
            }
            ConstraintKind::ForeignKey { .. } => {
                let hints = if ledger.needs_full_scan(id) {
                    None
                } else {
                    Some(ledger.hints(id)?)
                };
                if let Some(key) = find_orphan(def, hints.as_deref(), self.schema, self.store)? {
                    return Err(self.deferred(def, ViolationKind::ForeignKey, scope, key.values_lossy())?);
                }
            }
            ConstraintKind::Check { .. } => {
                let table = self.schema.require_table(def.table)?;
                if let Some(row) = find_failing_row(def, table, self.store)? {
                    return Err(self.deferred(def, ViolationKind::Check, scope, row)?);
                }
            }
        }
        Ok(())
    }

    /// Examine the checked keys of a transaction.
    ///
    /// Fails on a key that is duplicated, or a child key whose referenced key
    /// is gone.
    pub fn validate_write_set(&self, write_set: &WriteSet) -> Result<(), Error> {
        for (id, keys) in write_set.iter() {
            let Some(def) = self.schema.constraint(id) else {
                continue;
            };
            match &def.kind {
                ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                    let Some(handle) = def.index else {
                        continue;
                    };
                    for key in keys {
                        if self.store.index_rows(handle, key)?.len() > 1 {
                            return Err(self.conflict(def, ViolationKind::Duplicate, key)?);
                        }
                    }
                }
                ConstraintKind::ForeignKey { .. } => {
                    let hints: Vec<IndexKey> = keys.iter().cloned().collect();
                    if let Some(key) = find_orphan(def, Some(&hints), self.schema, self.store)? {
                        return Err(self.conflict(def, ViolationKind::ForeignKey, &key)?);
                    }
                }
                ConstraintKind::Check { .. } => {}
            }
        }
        Ok(())
    }

    /// Validate a constraint being added to a table that may hold rows.
    pub fn validate_new_constraint(&self, def: &ConstraintDef) -> Result<(), Error> {
        let table = self.schema.require_table(def.table)?;
        match &def.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                if let Some(key) = find_duplicate(def, self.store)? {
                    return Err(ConstraintError::DuplicateKey {
                        constraint: def.name.clone(),
                        table: table.qualified_name(),
                        key: key.values_lossy(),
                    }
                    .into());
                }
            }
            ConstraintKind::ForeignKey {
                referenced_table, ..
            } => {
                if let Some(key) = find_orphan(def, None, self.schema, self.store)? {
                    return Err(ConstraintError::AddForeignKeyViolation {
                        constraint: def.name.clone(),
                        table: table.qualified_name(),
                        referenced_table: self.schema.require_table(*referenced_table)?.qualified_name(),
                        key: key.values_lossy(),
                    }
                    .into());
                }
            }
            ConstraintKind::Check { expression } => {
                if find_failing_row(def, table, self.store)?.is_some() {
                    return Err(ConstraintError::CheckViolation {
                        constraint: def.name.clone(),
                        table: table.qualified_name(),
                        expression: expression.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn conflict(&self, def: &ConstraintDef, kind: ViolationKind, key: &IndexKey) -> Result<Error, Error> {
        Ok(ConstraintError::CommitConflict {
            kind,
            constraint: def.name.clone(),
            table: self.schema.require_table(def.table)?.qualified_name(),
            key: key.values_lossy(),
        }
        .into())
    }

    fn deferred(
        &self,
        def: &ConstraintDef,
        kind: ViolationKind,
        scope: ErrorScope,
        key: Vec<Value>,
    ) -> Result<Error, Error> {
        let referenced_table = match &def.kind {
            ConstraintKind::ForeignKey {
                referenced_table, ..
            } => Some(self.schema.require_table(*referenced_table)?.qualified_name()),
            _ => None,
        };
        Ok(ConstraintError::DeferredViolation {
            scope,
            kind,
            constraint: def.name.clone(),
            table: self.schema.require_table(def.table)?.qualified_name(),
            referenced_table,
            key,
        }
        .into())
    }
}

/// Validates the deferred ledger, then the checked keys, before a
/// transaction's writes are applied.
///
/// Must run under the database commit lock.
pub struct CommitValidator<'a> {
    schema: &'a SchemaBundle,
    ledger: &'a DeferredLedger,
    write_set: &'a WriteSet,
}

impl<'a> CommitValidator<'a> {
    pub fn new(schema: &'a SchemaBundle, ledger: &'a DeferredLedger, write_set: &'a WriteSet) -> Self {
        Self {
            schema,
            ledger,
            write_set,
        }
    }
}

impl PreCommitHook for CommitValidator<'_> {
    fn before_commit(&mut self, tx: &Transaction<'_>) -> Result<(), Error> {
        let validator = ConstraintValidator::new(self.schema, tx);

        if !self.ledger.is_empty() {
            let constraints = self.ledger.constraints().len();
            if let Err(e) = validator.validate_ledger(self.ledger, ErrorScope::Transaction) {
                warn!(error = %e, "deferred constraint violated at commit");
                return Err(e);
            }
            info!(constraints, "deferred constraints validated at commit");
        }

        if let Err(e) = validator.validate_write_set(self.write_set) {
            warn!(error = %e, "checked key conflicts with a concurrent commit");
            return Err(e);
        }
        debug!(keys = self.write_set.len(), "checked keys confirmed at commit");
        Ok(())
    }
}
