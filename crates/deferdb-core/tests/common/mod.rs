//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cmp::Ordering;

use deferdb_core::{
    ColumnSpec, ColumnType, ConstraintConfig, ConstraintSpec, Database, EngineConfig, Session,
    TableSpec, Value,
};

pub struct TestContext {
    pub db: Database,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_constraints(ConstraintConfig::default())
    }

    pub fn with_constraints(constraints: ConstraintConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(EngineConfig::new(dir.path()).with_constraints(constraints)).unwrap();
        Self { db, _dir: dir }
    }

    pub fn session(&self) -> Session<'_> {
        self.db.session()
    }

    /// Run DDL in its own committed transaction.
    pub fn create(&self, spec: TableSpec) {
        let mut session = self.session();
        session.create_table(spec).unwrap();
        session.commit().unwrap();
    }

    /// Insert rows in their own committed transaction.
    pub fn seed(&self, table: &str, rows: Vec<Vec<Value>>) {
        let mut session = self.session();
        session.insert(table, rows).unwrap();
        session.commit().unwrap();
    }

    /// All rows of a table as committed, sorted.
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        sorted(self.session().select(table, None).unwrap())
    }
}

pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.compare(y).unwrap_or(Ordering::Equal))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    rows
}

pub fn int_column(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Integer)
}

pub fn text_column(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Varchar)
}

/// `REF(i PRIMARY KEY)` plus `T(i)` with foreign key `c` from `T.i` to
/// `REF.i`, shaped by `fk`.
pub fn setup_ref_and_child(ctx: &TestContext, fk: impl FnOnce(ConstraintSpec) -> ConstraintSpec) {
    ctx.create(
        TableSpec::new("ref")
            .column(int_column("i"))
            .constraint(ConstraintSpec::primary_key("ref_pk", ["i"])),
    );
    ctx.create(
        TableSpec::new("t")
            .column(int_column("i"))
            .constraint(fk(ConstraintSpec::foreign_key("c", ["i"], "ref"))),
    );
}
