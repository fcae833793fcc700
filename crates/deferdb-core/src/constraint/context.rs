//! Per-transaction constraint state.

use tracing::{debug, info};

use super::ledger::{DeferredEntry, DeferredLedger, LedgerMark};
use super::mode::{ConstraintMode, ConstraintModeTable, SetConstraints};
use super::validator::ConstraintValidator;
use super::write_set::WriteSet;
use crate::catalog::{ConstraintDef, ConstraintId, SchemaBundle};
use crate::config::ConstraintConfig;
use crate::error::{Error, ErrorScope};
use crate::storage::Transaction;

/// Mode table, deferred ledger and checked keys of one transaction.
///
/// Created at transaction start and discarded at commit or rollback, so modes
/// revert to each constraint's declared initial mode.
#[derive(Debug)]
pub struct TransactionContext {
    pub modes: ConstraintModeTable,
    pub ledger: DeferredLedger,
    pub write_set: WriteSet,
}

impl TransactionContext {
    pub fn new(config: &ConstraintConfig) -> Self {
        Self {
            modes: ConstraintModeTable::new(),
            ledger: DeferredLedger::new(config.ledger_spill_threshold),
            write_set: WriteSet::new(),
        }
    }

    pub fn mode(&self, def: &ConstraintDef) -> ConstraintMode {
        self.modes.mode(def)
    }

    pub fn is_deferred(&self, def: &ConstraintDef) -> bool {
        self.modes.is_deferred(def)
    }

    /// Record deferred work for a constraint.
    pub fn defer(&mut self, def: &ConstraintDef, entry: DeferredEntry) -> Result<(), Error> {
        if self.ledger.record(entry)? {
            debug!(
                constraint = %def.name,
                kind = def.kind_label(),
                "deferred constraint work recorded"
            );
        }
        Ok(())
    }

    /// Apply `SET CONSTRAINTS`.
    ///
    /// Switching to IMMEDIATE first validates the ledger entries of every
    /// affected constraint that is currently deferred; a violation fails the
    /// statement and leaves all modes unchanged.
    pub fn set_constraints(
        &mut self,
        stmt: &SetConstraints,
        schema: &SchemaBundle,
        store: &Transaction<'_>,
    ) -> Result<(), Error> {
        let ids = stmt.resolve(schema)?;

        if stmt.mode == ConstraintMode::Immediate {
            let validator = ConstraintValidator::new(schema, store);
            for id in &ids {
                let Some(def) = schema.constraint(*id) else {
                    continue;
                };
                if self.is_deferred(def) && self.ledger.has_entries(*id) {
                    validator.validate_deferred(*id, &self.ledger, ErrorScope::Statement)?;
                }
            }
            for id in &ids {
                self.ledger.clear(*id)?;
            }
        }

        for id in &ids {
            self.modes.set(*id, stmt.mode);
        }
        info!(statement = %stmt, constraints = ids.len(), "constraint modes changed");
        Ok(())
    }

    /// Drop all state for a constraint that no longer exists.
    pub fn forget(&mut self, id: ConstraintId) -> Result<(), Error> {
        self.modes.forget(id);
        self.write_set.forget(id);
        self.ledger.clear(id)
    }

    pub fn mark(&self) -> LedgerMark {
        self.ledger.mark()
    }

    pub fn rollback_to(&mut self, mark: LedgerMark) -> Result<(), Error> {
        self.ledger.rollback_to(mark)
    }

    pub fn release(&mut self) {
        self.ledger.release();
    }
}
