//! Sessions and their transactions.
//!
//! A transaction starts with the first statement of a session and ends with
//! [`Session::commit`] or [`Session::rollback`]. Each statement runs under a
//! savepoint: a statement-level error undoes only that statement, while a
//! transaction-level error (a deferred violation found at commit, a storage
//! failure) discards the whole transaction.

use tracing::{debug, info, instrument, warn};

use crate::catalog::{
    normalize_ident, ConstraintId, ConstraintKind, ConstraintSpec, IndexHandle, SchemaBundle,
    TableDef, TableId, TableSpec,
};
use crate::constraint::{
    CommitValidator, ConstraintMode, ConstraintValidator, DeferredEntry, DeferredOperation,
    RowProcessing, SetConstraints, StatementKind, TransactionContext,
};
use crate::database::Database;
use crate::dml::{
    import_rows, matching_rows, plan_update, touches_referenced_key, Assignment, ImportMode,
    ImportSummary, StatementExecutor,
};
use crate::error::{CatalogError, Error, ErrorScope};
use crate::storage::{IndexKey, Transaction};
use crate::value::Value;

struct ActiveTransaction<'db> {
    store: Transaction<'db>,
    /// Working copy of the schema; DDL lands here and is published at commit.
    schema: SchemaBundle,
    base_version: u64,
    schema_dirty: bool,
    context: TransactionContext,
}

/// A connection-like handle running one transaction at a time.
pub struct Session<'db> {
    db: &'db Database,
    active: Option<ActiveTransaction<'db>>,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self { db, active: None }
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.active.is_some()
    }

    /// The schema as this session sees it, including uncommitted DDL.
    pub fn schema(&self) -> SchemaBundle {
        match &self.active {
            Some(tx) => tx.schema.clone(),
            None => self.db.schema(),
        }
    }

    fn begin(&mut self) -> &mut ActiveTransaction<'db> {
        let db = self.db;
        self.active.get_or_insert_with(|| {
            debug!("transaction started");
            ActiveTransaction {
                store: db.engine().transaction(),
                schema: db.catalog().schema(),
                base_version: db.catalog().version(),
                schema_dirty: false,
                context: TransactionContext::new(&db.config().constraints),
            }
        })
    }

    /// Run one statement under a savepoint.
    fn statement<T>(
        &mut self,
        ddl: bool,
        f: impl FnOnce(&'db Database, &mut ActiveTransaction<'db>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let db = self.db;
        let tx = self.begin();
        let savepoint = tx.store.savepoint();
        let mark = tx.context.mark();
        let snapshot = ddl.then(|| (tx.schema.clone(), tx.schema_dirty));

        let err = match f(db, tx) {
            Ok(value) => {
                tx.context.release();
                return Ok(value);
            }
            Err(e) => e,
        };

        match err.scope() {
            ErrorScope::Statement => {
                tx.store.rollback_to(savepoint);
                if let Some((schema, dirty)) = snapshot {
                    tx.schema = schema;
                    tx.schema_dirty = dirty;
                }
                if let Err(undo) = tx.context.rollback_to(mark) {
                    warn!(error = %undo, "ledger rollback failed, discarding transaction");
                    self.active = None;
                    return Err(undo);
                }
                tx.context.release();
                debug!(error = %err, sql_state = err.sql_state(), "statement rolled back");
            }
            ErrorScope::Transaction => {
                self.active = None;
                warn!(error = %err, sql_state = err.sql_state(), "transaction rolled back");
            }
        }
        Err(err)
    }

    /// `CREATE TABLE` with inline constraints.
    pub fn create_table(&mut self, spec: TableSpec) -> Result<TableId, Error> {
        self.statement(true, |db, tx| {
            let table_id = db.catalog().allocate_id()?;
            let table = spec.resolve(table_id)?;
            let name = table.qualified_name();
            tx.schema.add_table(table.clone())?;

            let mut constraints: Vec<&ConstraintSpec> = spec.constraints.iter().collect();
            constraints.sort_by_key(|c| c.registration_rank());
            for constraint in constraints {
                register_constraint(db, tx, &table, constraint, false)?;
            }

            tx.schema_dirty = true;
            info!(table = %name, "table created");
            Ok(table_id)
        })
    }

    /// `ALTER TABLE ... ADD CONSTRAINT`.
    ///
    /// Existing rows are indexed. A constraint that starts out immediate is
    /// validated now; one that starts out deferred is queued for a full scan
    /// at commit.
    pub fn add_constraint(&mut self, table: &str, spec: ConstraintSpec) -> Result<ConstraintId, Error> {
        self.statement(true, |db, tx| {
            let table = tx.schema.resolve_table(table)?.clone();
            let def = register_constraint(db, tx, &table, &spec, true)?;

            if let Some(handle) = def.index {
                for (row, values) in tx.store.scan_table(table.id)? {
                    if let Some(key) = IndexKey::encode(&def.project(&values)) {
                        tx.store.insert_index_entry(handle, &key, row);
                    }
                }
            }

            if tx.context.is_deferred(&def) {
                tx.context.defer(
                    &def,
                    DeferredEntry::full_scan(def.id, DeferredOperation::AddConstraint),
                )?;
            } else {
                ConstraintValidator::new(&tx.schema, &tx.store).validate_new_constraint(&def)?;
            }

            tx.schema_dirty = true;
            info!(
                constraint = %def.name,
                kind = def.kind_label(),
                table = %table.qualified_name(),
                "constraint added"
            );
            Ok(def.id)
        })
    }

    /// `ALTER TABLE ... DROP CONSTRAINT`.
    pub fn drop_constraint(&mut self, name: &str) -> Result<(), Error> {
        self.statement(true, |_db, tx| {
            let def = tx
                .schema
                .constraint_by_name(name)
                .cloned()
                .ok_or_else(|| CatalogError::not_found("constraint", normalize_ident(name)))?;
            if let Some(dependent) = tx.schema.referencing(def.id).next() {
                return Err(CatalogError::DependentConstraint {
                    constraint: def.name.clone(),
                    dependent: dependent.name.clone(),
                }
                .into());
            }

            tx.schema.remove_constraint(def.id);
            if let Some(handle) = def.index {
                tx.store.drop_index(handle)?;
            }
            tx.context.forget(def.id)?;
            tx.schema_dirty = true;
            info!(constraint = %def.name, "constraint dropped");
            Ok(())
        })
    }

    /// `SET CONSTRAINTS`.
    pub fn set_constraints(&mut self, stmt: &SetConstraints) -> Result<(), Error> {
        self.statement(false, |_db, tx| {
            tx.context.set_constraints(stmt, &tx.schema, &tx.store)
        })
    }

    /// Parse and run a `SET CONSTRAINTS` statement.
    pub fn execute_set_constraints(&mut self, text: &str) -> Result<(), Error> {
        let stmt: SetConstraints = text.parse()?;
        self.set_constraints(&stmt)
    }

    /// Current mode of a constraint in this session.
    pub fn constraint_mode(&self, name: &str) -> Result<ConstraintMode, Error> {
        let not_found = || CatalogError::not_found("constraint", normalize_ident(name));
        match &self.active {
            Some(tx) => {
                let def = tx.schema.constraint_by_name(name).ok_or_else(not_found)?;
                Ok(tx.context.mode(def))
            }
            None => {
                let schema = self.db.schema();
                let def = schema.constraint_by_name(name).ok_or_else(not_found)?;
                Ok(def.characteristics.initially)
            }
        }
    }

    /// Names of constraints with deferred work in the open transaction.
    pub fn deferred_constraints(&self) -> Vec<String> {
        let Some(tx) = &self.active else {
            return Vec::new();
        };
        tx.context
            .ledger
            .constraints()
            .into_iter()
            .filter_map(|id| tx.schema.constraint(id).map(|c| c.name.clone()))
            .collect()
    }

    /// `INSERT INTO table VALUES ...`.
    pub fn insert(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<usize, Error> {
        self.statement(false, |db, tx| {
            let table = tx.schema.resolve_table(table)?;
            let processing = RowProcessing::select(StatementKind::InsertValues, rows.len(), false);
            let mut executor =
                StatementExecutor::new(&tx.schema, &mut tx.store, &mut tx.context, &db.config().constraints);
            let inserted = executor.insert(table.id, rows, processing, DeferredOperation::Insert)?;
            executor.finish()?;
            Ok(inserted)
        })
    }

    /// `INSERT INTO target SELECT * FROM source [WHERE filter]`.
    pub fn insert_select(
        &mut self,
        target: &str,
        source: &str,
        filter: Option<&str>,
    ) -> Result<usize, Error> {
        self.statement(false, |db, tx| {
            let target = tx.schema.resolve_table(target)?;
            let source = tx.schema.resolve_table(source)?;
            let rows: Vec<Vec<Value>> = matching_rows(&tx.store, source, filter)?
                .into_iter()
                .map(|(_, values)| values)
                .collect();

            let processing = RowProcessing::select(StatementKind::InsertSelect, rows.len(), false);
            let mut executor =
                StatementExecutor::new(&tx.schema, &mut tx.store, &mut tx.context, &db.config().constraints);
            let inserted = executor.insert(target.id, rows, processing, DeferredOperation::Insert)?;
            executor.finish()?;
            Ok(inserted)
        })
    }

    /// `UPDATE table SET assignments [WHERE filter]`.
    pub fn update(
        &mut self,
        table: &str,
        assignments: &[Assignment],
        filter: Option<&str>,
    ) -> Result<usize, Error> {
        self.statement(false, |db, tx| {
            let table = tx.schema.resolve_table(table)?;
            let rows = matching_rows(&tx.store, table, filter)?;
            let changes = plan_update(table, rows, assignments)?;

            let assigned: Vec<usize> = assignments
                .iter()
                .filter_map(|a| table.column_index(&a.column))
                .collect();
            let touches = touches_referenced_key(&tx.schema, table.id, &assigned);
            let processing = RowProcessing::select(StatementKind::Update, changes.len(), touches);

            let mut executor =
                StatementExecutor::new(&tx.schema, &mut tx.store, &mut tx.context, &db.config().constraints);
            let updated = executor.update(table.id, changes, processing, DeferredOperation::Update)?;
            executor.finish()?;
            Ok(updated)
        })
    }

    /// `DELETE FROM table [WHERE filter]`.
    pub fn delete(&mut self, table: &str, filter: Option<&str>) -> Result<usize, Error> {
        self.statement(false, |db, tx| {
            let table = tx.schema.resolve_table(table)?;
            let rows = matching_rows(&tx.store, table, filter)?;
            let processing = RowProcessing::select(StatementKind::Delete, rows.len(), false);

            let mut executor =
                StatementExecutor::new(&tx.schema, &mut tx.store, &mut tx.context, &db.config().constraints);
            let deleted = executor.delete(table.id, rows, processing, DeferredOperation::Delete)?;
            executor.finish()?;
            Ok(deleted)
        })
    }

    /// Rows of a table visible to this session.
    pub fn select(&self, table: &str, filter: Option<&str>) -> Result<Vec<Vec<Value>>, Error> {
        let rows = match &self.active {
            Some(tx) => {
                let table = tx.schema.resolve_table(table)?;
                matching_rows(&tx.store, table, filter)?
            }
            None => {
                let schema = self.db.schema();
                let table = schema.resolve_table(table)?;
                matching_rows(&self.db.engine().transaction(), table, filter)?
            }
        };
        Ok(rows.into_iter().map(|(_, values)| values).collect())
    }

    /// Bulk-load rows, then commit.
    ///
    /// Immediate violations fail the import as a statement. Violations of
    /// deferred constraints surface from the commit that ends the import and
    /// roll back the whole transaction.
    #[instrument(skip(self, rows), fields(row_count = rows.len()))]
    pub fn import(
        &mut self,
        table: &str,
        rows: Vec<Vec<Value>>,
        mode: ImportMode,
    ) -> Result<ImportSummary, Error> {
        let summary = self.statement(false, |db, tx| {
            let table = tx.schema.resolve_table(table)?;
            let mut executor =
                StatementExecutor::new(&tx.schema, &mut tx.store, &mut tx.context, &db.config().constraints);
            import_rows(&mut executor, table, rows, mode)
        })?;
        self.commit()?;
        Ok(summary)
    }

    /// Validate deferred constraints and the keys checked by this
    /// transaction, then commit.
    ///
    /// A violation rolls the transaction back; the session is then ready for
    /// a new transaction.
    #[instrument(skip(self))]
    pub fn commit(&mut self) -> Result<(), Error> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let _guard = self.db.lock_commits();

        let ActiveTransaction {
            store,
            schema,
            base_version,
            schema_dirty,
            context,
        } = active;

        // rows written under an outdated schema miss the indexes of newer constraints
        if (schema_dirty || !store.is_empty()) && !self.db.catalog().is_current(base_version) {
            store.rollback();
            warn!(base_version, "schema changed by another transaction");
            return Err(Error::Transaction(
                "schema was changed by another transaction".to_string(),
            ));
        }

        let writes = store.write_count();
        let deferred = context.ledger.constraints().len();
        let mut validator = CommitValidator::new(&schema, &context.ledger, &context.write_set);
        store.commit_with(&mut validator)?;

        if schema_dirty {
            let version = self.db.catalog().publish(schema, base_version)?;
            debug!(version, "schema changes published");
        }
        info!(writes, deferred, "transaction committed");
        Ok(())
    }

    /// Discard the open transaction.
    pub fn rollback(&mut self) {
        if let Some(active) = self.active.take() {
            active.store.rollback();
            info!("transaction rolled back");
        }
    }
}

/// Resolve a constraint spec against the working schema and register it.
fn register_constraint(
    db: &Database,
    tx: &mut ActiveTransaction<'_>,
    table: &TableDef,
    spec: &ConstraintSpec,
    strict_pk_nullability: bool,
) -> Result<crate::catalog::ConstraintDef, Error> {
    let id = db.catalog().allocate_id()?;
    let index = if spec.needs_index() {
        Some(IndexHandle(db.catalog().allocate_id()?))
    } else {
        None
    };
    let def = spec.resolve(&tx.schema, table, id, index, strict_pk_nullability)?;
    if matches!(def.kind, ConstraintKind::ForeignKey { .. }) {
        debug!(constraint = %def.name, "foreign key registered");
    }
    tx.schema.add_constraint(def.clone())?;
    Ok(def)
}
