//! Check constraint evaluation.

use super::context::TransactionContext;
use super::ledger::{DeferredEntry, DeferredOperation};
use crate::catalog::{ConstraintDef, ConstraintKind, TableDef};
use crate::error::{ConstraintError, Error};
use crate::expr::{ExpressionEvaluator, RowScope};
use crate::storage::Transaction;
use crate::value::Value;

pub struct CheckConstraintChecker;

impl CheckConstraintChecker {
    /// Evaluate a check constraint against one row.
    ///
    /// Only FALSE violates; UNKNOWN passes.
    pub fn check(
        def: &ConstraintDef,
        table: &TableDef,
        row: &[Value],
        operation: DeferredOperation,
        context: &mut TransactionContext,
    ) -> Result<(), Error> {
        let ConstraintKind::Check { expression } = &def.kind else {
            return Ok(());
        };
        if !ExpressionEvaluator::predicate(expression, &RowScope::new(table, row))?.is_false() {
            return Ok(());
        }

        if context.is_deferred(def) {
            return context.defer(def, DeferredEntry::full_scan(def.id, operation));
        }

        Err(ConstraintError::CheckViolation {
            constraint: def.name.clone(),
            table: table.qualified_name(),
            expression: expression.clone(),
        }
        .into())
    }
}

/// First row of the table failing the check, if any.
pub(crate) fn find_failing_row(
    def: &ConstraintDef,
    table: &TableDef,
    store: &Transaction<'_>,
) -> Result<Option<Vec<Value>>, Error> {
    let ConstraintKind::Check { expression } = &def.kind else {
        return Ok(None);
    };
    for (_, row) in store.scan_table(table.id)? {
        if ExpressionEvaluator::predicate(expression, &RowScope::new(table, &row))?.is_false() {
            return Ok(Some(row));
        }
    }
    Ok(None)
}
