//! Statement executor: row writes, index maintenance and constraint checks.

use tracing::debug;

use crate::catalog::{ConstraintDef, ConstraintKind, SchemaBundle, TableDef, TableId};
use crate::config::ConstraintConfig;
use crate::constraint::{
    ActionRequest, CascadeResult, CheckConstraintChecker, DeferredOperation, ForeignKeyChecker,
    KeyChange, ReferencedKeyChecker, ReferentialActionExecutor, RowChange, RowMutator,
    RowProcessing, StatementKind, TransactionContext, UniquenessChecker,
};
use crate::error::{ConstraintError, Error};
use crate::storage::{IndexKey, RowId, Transaction};
use crate::value::Value;

/// Runs the row changes of one statement.
///
/// Every write keeps the key indexes in step with the table and passes
/// through the row checkers. Referential actions triggered by the statement
/// are applied through the same executor, one nesting level deeper.
pub struct StatementExecutor<'s, 'db> {
    schema: &'s SchemaBundle,
    store: &'s mut Transaction<'db>,
    context: &'s mut TransactionContext,
    actions: ReferentialActionExecutor,
    referenced: ReferencedKeyChecker,
    depth: usize,
    cascade: CascadeResult,
}

impl<'s, 'db> StatementExecutor<'s, 'db> {
    pub fn new(
        schema: &'s SchemaBundle,
        store: &'s mut Transaction<'db>,
        context: &'s mut TransactionContext,
        config: &ConstraintConfig,
    ) -> Self {
        Self {
            schema,
            store,
            context,
            actions: ReferentialActionExecutor::new(config.max_cascade_depth),
            referenced: ReferencedKeyChecker::new(),
            depth: 0,
            cascade: CascadeResult::new(),
        }
    }

    /// The transaction this executor writes to.
    pub fn store(&self) -> &Transaction<'db> {
        &*self.store
    }

    /// Insert rows. Returns the number inserted.
    pub fn insert(
        &mut self,
        table: TableId,
        rows: Vec<Vec<Value>>,
        processing: RowProcessing,
        operation: DeferredOperation,
    ) -> Result<usize, Error> {
        let schema = self.schema;
        let table = schema.require_table(table)?;
        let prepared = rows
            .into_iter()
            .map(|values| prepare_row(table, values))
            .collect::<Result<Vec<_>, _>>()?;

        match processing {
            RowProcessing::Direct => {
                for values in &prepared {
                    self.write_insert(table, values)?;
                    self.check_insert(table, values, operation)?;
                }
            }
            RowProcessing::Batched => {
                for values in &prepared {
                    self.write_insert(table, values)?;
                }
                for values in &prepared {
                    self.check_insert(table, values, operation)?;
                }
            }
        }
        Ok(prepared.len())
    }

    /// Rewrite rows. Returns the number updated.
    pub fn update(
        &mut self,
        table: TableId,
        changes: Vec<RowChange>,
        processing: RowProcessing,
        operation: DeferredOperation,
    ) -> Result<usize, Error> {
        let schema = self.schema;
        let table = schema.require_table(table)?;
        let prepared = changes
            .into_iter()
            .map(|c| {
                Ok(RowChange {
                    row: c.row,
                    old: c.old,
                    new: prepare_row(table, c.new)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        match processing {
            RowProcessing::Direct => {
                for change in &prepared {
                    self.write_update(table, change);
                    self.check_update(table, change, operation)?;
                }
            }
            RowProcessing::Batched => {
                for change in &prepared {
                    self.write_update(table, change);
                }
                for change in &prepared {
                    self.check_update(table, change, operation)?;
                }
            }
        }
        Ok(prepared.len())
    }

    /// Delete rows. Rows already gone (removed by a cascade earlier in the
    /// statement) are skipped. Returns the number deleted.
    pub fn delete(
        &mut self,
        table: TableId,
        rows: Vec<(RowId, Vec<Value>)>,
        processing: RowProcessing,
        operation: DeferredOperation,
    ) -> Result<usize, Error> {
        let schema = self.schema;
        let table = schema.require_table(table)?;
        let mut deleted = 0;

        match processing {
            RowProcessing::Direct => {
                for (row, values) in &rows {
                    if self.write_delete(table, *row, values)? {
                        deleted += 1;
                        self.check_delete(table, values, operation)?;
                    }
                }
            }
            RowProcessing::Batched => {
                let mut written = Vec::with_capacity(rows.len());
                for (row, values) in &rows {
                    if self.write_delete(table, *row, values)? {
                        written.push(values);
                    }
                }
                deleted = written.len();
                for values in written {
                    self.check_delete(table, values, operation)?;
                }
            }
        }
        Ok(deleted)
    }

    /// End of statement: resolve held referenced keys until none remain.
    pub fn finish(&mut self) -> Result<CascadeResult, Error> {
        while self.referenced.has_pending() {
            let schema = self.schema;
            let requests = self.referenced.post_check(schema, self.store, self.context)?;
            self.apply_actions(requests)?;
        }
        if self.cascade.affected_count() > 0 {
            debug!(
                deleted = self.cascade.deleted,
                updated = self.cascade.updated,
                nullified = self.cascade.nullified,
                "statement referential actions"
            );
        }
        Ok(self.cascade)
    }

    fn write_insert(&mut self, table: &TableDef, values: &[Value]) -> Result<RowId, Error> {
        let row = self.store.engine().generate_row_id()?;
        self.store.put_row(table.id, row, values.to_vec());
        for def in self.schema.constraints_on(table.id) {
            if let (Some(handle), Some(key)) = (def.index, IndexKey::encode(&def.project(values))) {
                self.store.insert_index_entry(handle, &key, row);
            }
        }
        Ok(row)
    }

    fn write_update(&mut self, table: &TableDef, change: &RowChange) {
        self.store.put_row(table.id, change.row, change.new.clone());
        for def in self.schema.constraints_on(table.id) {
            let Some(handle) = def.index else {
                continue;
            };
            let old_key = IndexKey::encode(&def.project(&change.old));
            let new_key = IndexKey::encode(&def.project(&change.new));
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                self.store.remove_index_entry(handle, &key, change.row);
            }
            if let Some(key) = new_key {
                self.store.insert_index_entry(handle, &key, change.row);
            }
        }
    }

    fn write_delete(&mut self, table: &TableDef, row: RowId, values: &[Value]) -> Result<bool, Error> {
        if self.store.get_row(table.id, row)?.is_none() {
            return Ok(false);
        }
        self.store.delete_row(table.id, row);
        for def in self.schema.constraints_on(table.id) {
            if let (Some(handle), Some(key)) = (def.index, IndexKey::encode(&def.project(values))) {
                self.store.remove_index_entry(handle, &key, row);
            }
        }
        Ok(true)
    }

    fn check_insert(
        &mut self,
        table: &TableDef,
        values: &[Value],
        operation: DeferredOperation,
    ) -> Result<(), Error> {
        let schema = self.schema;
        for def in schema.constraints_on(table.id) {
            self.check_new_values(table, def, values, operation)?;
        }
        Ok(())
    }

    fn check_update(
        &mut self,
        table: &TableDef,
        change: &RowChange,
        operation: DeferredOperation,
    ) -> Result<(), Error> {
        let schema = self.schema;
        for def in schema.constraints_on(table.id) {
            if def.is_check() {
                self.check_new_values(table, def, &change.new, operation)?;
                continue;
            }

            let old = def.project(&change.old);
            let new = def.project(&change.new);
            if old == new {
                continue;
            }
            self.check_new_values(table, def, &change.new, operation)?;

            if def.is_key() {
                if let Some(key) = IndexKey::encode(&old) {
                    let requests = self.referenced.do_check(
                        def,
                        key,
                        KeyChange::Update(new),
                        operation,
                        self.depth,
                        schema,
                        self.store,
                        self.context,
                    )?;
                    self.apply_actions(requests)?;
                }
            }
        }
        Ok(())
    }

    fn check_delete(
        &mut self,
        table: &TableDef,
        values: &[Value],
        operation: DeferredOperation,
    ) -> Result<(), Error> {
        let schema = self.schema;
        for def in schema.constraints_on(table.id).filter(|d| d.is_key()) {
            if let Some(key) = IndexKey::encode(&def.project(values)) {
                let requests = self.referenced.do_check(
                    def,
                    key,
                    KeyChange::Delete,
                    operation,
                    self.depth,
                    schema,
                    self.store,
                    self.context,
                )?;
                self.apply_actions(requests)?;
            }
        }
        Ok(())
    }

    /// Run one constraint's checker over a row as it now stands.
    fn check_new_values(
        &mut self,
        table: &TableDef,
        def: &ConstraintDef,
        values: &[Value],
        operation: DeferredOperation,
    ) -> Result<(), Error> {
        let schema = self.schema;
        match &def.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                match IndexKey::encode(&def.project(values)) {
                    Some(key) => {
                        UniquenessChecker::check(def, &key, operation, schema, self.store, self.context)
                    }
                    None => Ok(()),
                }
            }
            ConstraintKind::ForeignKey { .. } => ForeignKeyChecker::check(
                def,
                &def.project(values),
                operation,
                schema,
                self.store,
                self.context,
            ),
            ConstraintKind::Check { .. } => {
                CheckConstraintChecker::check(def, table, values, operation, self.context)
            }
        }
    }

    fn apply_actions(&mut self, requests: Vec<ActionRequest>) -> Result<(), Error> {
        let schema = self.schema;
        let actions = self.actions;
        for request in requests {
            let result = actions.apply(schema, &request, self)?;
            self.cascade.merge(result);
        }
        Ok(())
    }
}

impl RowMutator for StatementExecutor<'_, '_> {
    fn child_rows(
        &self,
        foreign_key: &ConstraintDef,
        key: &IndexKey,
    ) -> Result<Vec<(RowId, Vec<Value>)>, Error> {
        let Some(handle) = foreign_key.index else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for row in self.store.index_rows(handle, key)? {
            if let Some(values) = self.store.get_row(foreign_key.table, row)? {
                rows.push((row, values));
            }
        }
        Ok(rows)
    }

    fn delete_rows(
        &mut self,
        table: TableId,
        rows: Vec<(RowId, Vec<Value>)>,
        depth: usize,
    ) -> Result<(), Error> {
        let processing = RowProcessing::select(StatementKind::CascadeDelete, rows.len(), false);
        let outer = std::mem::replace(&mut self.depth, depth);
        let result = self.delete(table, rows, processing, DeferredOperation::Delete);
        self.depth = outer;
        result.map(|_| ())
    }

    fn update_rows(
        &mut self,
        table: TableId,
        changes: Vec<RowChange>,
        depth: usize,
    ) -> Result<(), Error> {
        let touches = touches_referenced_key(self.schema, table, &changed_columns(&changes));
        let processing = RowProcessing::select(StatementKind::CascadeUpdate, changes.len(), touches);
        let outer = std::mem::replace(&mut self.depth, depth);
        let result = self.update(table, changes, processing, DeferredOperation::Update);
        self.depth = outer;
        result.map(|_| ())
    }
}

/// Check arity, coerce values to column types and enforce NOT NULL.
pub(crate) fn prepare_row(table: &TableDef, values: Vec<Value>) -> Result<Vec<Value>, Error> {
    if values.len() != table.columns.len() {
        return Err(Error::InvalidData(format!(
            "table '{}' has {} columns but {} values were supplied",
            table.qualified_name(),
            table.columns.len(),
            values.len()
        )));
    }

    values
        .into_iter()
        .zip(&table.columns)
        .map(|(value, column)| {
            if value.is_null() {
                if !column.nullable {
                    return Err(ConstraintError::NotNullViolation {
                        table: table.qualified_name(),
                        column: column.name.clone(),
                    }
                    .into());
                }
                return Ok(Value::Null);
            }
            let type_name = value.type_name();
            column.column_type.coerce(value).ok_or_else(|| {
                Error::InvalidData(format!(
                    "cannot store a {} value in column '{}' of type {:?}",
                    type_name, column.name, column.column_type
                ))
            })
        })
        .collect()
}

/// Column positions whose value differs in at least one change.
pub(crate) fn changed_columns(changes: &[RowChange]) -> Vec<usize> {
    let width = changes.first().map(|c| c.new.len()).unwrap_or(0);
    (0..width)
        .filter(|&i| changes.iter().any(|c| c.old.get(i) != c.new.get(i)))
        .collect()
}

/// Whether changing `columns` rewrites a key some foreign key references.
pub(crate) fn touches_referenced_key(schema: &SchemaBundle, table: TableId, columns: &[usize]) -> bool {
    schema
        .constraints_on(table)
        .filter(|d| d.is_key())
        .filter(|d| d.columns.iter().any(|c| columns.contains(c)))
        .any(|d| schema.referencing(d.id).next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};

    fn table() -> TableDef {
        TableDef {
            id: 1,
            schema: "APP".into(),
            name: "T".into(),
            columns: vec![
                ColumnDef {
                    name: "ID".into(),
                    column_type: ColumnType::Integer,
                    nullable: false,
                },
                ColumnDef {
                    name: "RATE".into(),
                    column_type: ColumnType::Double,
                    nullable: true,
                },
            ],
        }
    }

    #[test]
    fn test_prepare_row_coerces() {
        let row = prepare_row(&table(), vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(row, vec![Value::Int(1), Value::Float(2.0)]);
    }

    #[test]
    fn test_prepare_row_rejects() {
        let err = prepare_row(&table(), vec![Value::Null, Value::Null]).unwrap_err();
        assert_eq!(err.sql_state(), "23502");

        let err = prepare_row(&table(), vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.sql_state(), "22005");

        let err = prepare_row(&table(), vec![Value::String("x".into()), Value::Null]).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_changed_columns() {
        let changes = vec![
            RowChange {
                row: 1,
                old: vec![Value::Int(1), Value::Int(5)],
                new: vec![Value::Int(1), Value::Int(6)],
            },
            RowChange {
                row: 2,
                old: vec![Value::Int(2), Value::Int(5)],
                new: vec![Value::Int(2), Value::Int(5)],
            },
        ];
        assert_eq!(changed_columns(&changes), vec![1]);
    }
}
