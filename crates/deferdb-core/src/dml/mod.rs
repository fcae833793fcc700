//! Data-modifying statements.

mod executor;
mod import;

pub use executor::StatementExecutor;
pub use import::{ImportMode, ImportSummary};

pub(crate) use executor::touches_referenced_key;
pub(crate) use import::import_rows;

use crate::catalog::TableDef;
use crate::constraint::RowChange;
use crate::error::{CatalogError, Error};
use crate::expr::{EvaluationError, ExpressionEvaluator, RowScope};
use crate::storage::{RowId, Transaction};
use crate::value::Value;

/// `column = expression` in an UPDATE.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Assignment {
    pub column: String,
    pub expression: String,
}

impl Assignment {
    pub fn new(column: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            expression: expression.into(),
        }
    }
}

/// Rows of `table` for which `filter` is TRUE; every row without a filter.
pub(crate) fn matching_rows(
    store: &Transaction<'_>,
    table: &TableDef,
    filter: Option<&str>,
) -> Result<Vec<(RowId, Vec<Value>)>, Error> {
    let rows = store.scan_table(table.id)?;
    let Some(filter) = filter else {
        return Ok(rows);
    };
    ExpressionEvaluator::validate_predicate(filter, table)?;

    let mut matched = Vec::new();
    for (row, values) in rows {
        if ExpressionEvaluator::predicate(filter, &RowScope::new(table, &values))?.is_true() {
            matched.push((row, values));
        }
    }
    Ok(matched)
}

/// New row images for an UPDATE. Expressions see the row's old values.
pub(crate) fn plan_update(
    table: &TableDef,
    rows: Vec<(RowId, Vec<Value>)>,
    assignments: &[Assignment],
) -> Result<Vec<RowChange>, Error> {
    let mut targets = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = table
            .column_index(&assignment.column)
            .ok_or_else(|| EvaluationError::UnknownColumn(assignment.column.clone()))?;
        if targets.iter().any(|(c, _)| *c == column) {
            return Err(CatalogError::InvalidDefinition(format!(
                "column '{}' assigned more than once",
                assignment.column
            ))
            .into());
        }
        ExpressionEvaluator::validate_scalar(&assignment.expression, table)?;
        targets.push((column, assignment.expression.as_str()));
    }

    rows.into_iter()
        .map(|(row, old)| -> Result<RowChange, Error> {
            let mut new = old.clone();
            for (column, expression) in &targets {
                new[*column] = ExpressionEvaluator::scalar(expression, &RowScope::new(table, &old))?;
            }
            Ok(RowChange { row, old, new })
        })
        .collect()
}
