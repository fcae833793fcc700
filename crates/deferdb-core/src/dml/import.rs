//! Bulk load into an existing table.
//!
//! Imported rows go through the same executor and checkers as ordinary
//! inserts, batched; constraint mode decides whether violations fail the
//! import at once or are recorded for the commit that ends it.

use tracing::info;

use super::executor::StatementExecutor;
use crate::catalog::TableDef;
use crate::constraint::{DeferredOperation, RowProcessing, StatementKind};
use crate::error::Error;
use crate::value::Value;

/// What happens to the table's existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Keep existing rows.
    #[default]
    Append,
    /// Delete existing rows first.
    Replace,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub deleted: usize,
    pub inserted: usize,
}

pub(crate) fn import_rows(
    executor: &mut StatementExecutor<'_, '_>,
    table: &TableDef,
    rows: Vec<Vec<Value>>,
    mode: ImportMode,
) -> Result<ImportSummary, Error> {
    let mut summary = ImportSummary::default();

    if mode == ImportMode::Replace {
        let existing = executor.store().scan_table(table.id)?;
        summary.deleted = executor.delete(
            table.id,
            existing,
            RowProcessing::Batched,
            DeferredOperation::Import,
        )?;
    }

    let processing = RowProcessing::select(StatementKind::Import, rows.len(), false);
    summary.inserted = executor.insert(table.id, rows, processing, DeferredOperation::Import)?;
    executor.finish()?;

    info!(
        table = %table.qualified_name(),
        deleted = summary.deleted,
        inserted = summary.inserted,
        "import loaded"
    );
    Ok(summary)
}
