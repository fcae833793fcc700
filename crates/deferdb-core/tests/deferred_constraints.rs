//! Integration tests for deferred constraint checking and SET CONSTRAINTS.

mod common;

use common::{int_column, setup_ref_and_child, sorted, text_column, TestContext};
use deferdb_core::{
    row, Assignment, ConstraintConfig, ConstraintError, ConstraintMode, ConstraintSpec,
    ErrorScope, TableSpec, Value, ViolationKind,
};

fn deferrable_fk(fk: ConstraintSpec) -> ConstraintSpec {
    fk.deferrable().initially_immediate()
}

#[test]
fn test_deferred_orphan_fails_commit() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    session.execute_set_constraints("SET CONSTRAINTS c DEFERRED").unwrap();
    session.insert("t", vec![row![2]]).unwrap();
    assert_eq!(session.deferred_constraints(), vec!["C".to_string()]);

    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23516");
    assert_eq!(err.scope(), ErrorScope::Transaction);
    match err.as_constraint() {
        Some(ConstraintError::DeferredViolation {
            kind, constraint, key, ..
        }) => {
            assert_eq!(*kind, ViolationKind::ForeignKey);
            assert_eq!(constraint, "C");
            assert_eq!(key, &vec![Value::Int(2)]);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(!session.in_transaction());
    assert!(session.select("t", Some("i = 2")).unwrap().is_empty());
}

#[test]
fn test_deferred_orphan_repaired_before_commit() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    session.execute_set_constraints("SET CONSTRAINTS c DEFERRED").unwrap();
    session.insert("t", vec![row![2]]).unwrap();
    session.insert("ref", vec![row![2]]).unwrap();
    session.commit().unwrap();

    assert_eq!(ctx.rows("t"), vec![row![2]]);
    assert_eq!(ctx.rows("ref"), vec![row![2]]);
}

#[test]
fn test_last_duplicate_of_referenced_key() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("ref")
            .column(int_column("i"))
            .column(text_column("s"))
            .constraint(ConstraintSpec::primary_key("ref_pk", ["i"]).initially_deferred()),
    );
    ctx.create(
        TableSpec::new("t")
            .column(int_column("i"))
            .constraint(ConstraintSpec::foreign_key("c", ["i"], "ref")),
    );

    let mut session = ctx.session();
    session
        .insert("ref", vec![row![1, "a"], row![1, "b"], row![1, "c"]])
        .unwrap();
    session.insert("t", vec![row![1]]).unwrap();

    assert_eq!(session.delete("ref", Some("s IN ('a', 'b')")).unwrap(), 2);

    let err = session.delete("ref", Some("s = 'c'")).unwrap_err();
    assert_eq!(err.sql_state(), "23503");
    assert_eq!(err.scope(), ErrorScope::Statement);
    match err.as_constraint() {
        Some(ConstraintError::ReferencedKeyViolation { constraint, key, .. }) => {
            assert_eq!(constraint, "C");
            assert_eq!(key, &vec![Value::Int(1)]);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // only the failed statement was undone
    assert!(session.in_transaction());
    assert_eq!(session.select("ref", None).unwrap(), vec![row![1, "c"]]);
    session.rollback();
}

#[test]
fn test_deferred_duplicates_fail_commit() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("ref")
            .column(int_column("i"))
            .constraint(ConstraintSpec::primary_key("ref_pk", ["i"]).initially_deferred()),
    );

    let mut session = ctx.session();
    session.insert("ref", vec![row![1]]).unwrap();
    session.insert("ref", vec![row![1]]).unwrap();

    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23506");
    assert_eq!(err.as_constraint().and_then(|e| e.constraint()), Some("REF_PK"));
    assert!(ctx.rows("ref").is_empty());
}

#[test]
fn test_deferred_duplicates_resolved_before_commit() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("u")
            .column(int_column("i"))
            .column(text_column("s"))
            .constraint(ConstraintSpec::unique("u_i", ["i"]).initially_deferred()),
    );

    let mut session = ctx.session();
    session.insert("u", vec![row![1, "a"], row![1, "b"]]).unwrap();
    session.delete("u", Some("s = 'b'")).unwrap();
    session.commit().unwrap();

    assert_eq!(ctx.rows("u"), vec![row![1, "a"]]);
}

#[test]
fn test_immediate_duplicate_rolls_back_statement_only() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk);

    let mut session = ctx.session();
    session.insert("ref", vec![row![1]]).unwrap();
    let err = session.insert("ref", vec![row![2], row![1]]).unwrap_err();
    assert_eq!(err.sql_state(), "23505");
    assert_eq!(err.scope(), ErrorScope::Statement);

    assert_eq!(sorted(session.select("ref", None).unwrap()), vec![row![1]]);
    session.commit().unwrap();
    assert_eq!(ctx.rows("ref"), vec![row![1]]);
}

#[test]
fn test_batched_update_shifts_unique_keys() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("ref")
            .column(int_column("i"))
            .constraint(ConstraintSpec::primary_key("ref_pk", ["i"])),
    );
    ctx.seed("ref", vec![row![1], row![2], row![3]]);

    let mut session = ctx.session();
    let err = session
        .update("ref", &[Assignment::new("i", "i + 1")], Some("i = 1"))
        .unwrap_err();
    assert_eq!(err.sql_state(), "23505");

    assert_eq!(
        session.update("ref", &[Assignment::new("i", "i + 1")], None).unwrap(),
        3
    );
    session.commit().unwrap();
    assert_eq!(ctx.rows("ref"), vec![row![2], row![3], row![4]]);
}

#[test]
fn test_set_immediate_validates_pending_work() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    session.execute_set_constraints("SET CONSTRAINTS c DEFERRED").unwrap();
    session.insert("t", vec![row![2]]).unwrap();

    for _ in 0..2 {
        let err = session
            .execute_set_constraints("SET CONSTRAINTS c IMMEDIATE")
            .unwrap_err();
        assert_eq!(err.sql_state(), "23517");
        assert_eq!(err.scope(), ErrorScope::Statement);
        assert!(session.in_transaction());
        assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Deferred);
    }

    session.insert("ref", vec![row![2]]).unwrap();
    session.execute_set_constraints("SET CONSTRAINTS c IMMEDIATE").unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);
    assert!(session.deferred_constraints().is_empty());

    // immediate again: orphans now fail at once
    let err = session.insert("t", vec![row![3]]).unwrap_err();
    assert_eq!(err.sql_state(), "23503");
    session.commit().unwrap();
    assert_eq!(ctx.rows("t"), vec![row![2]]);
}

#[test]
fn test_set_immediate_is_idempotent() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    session.execute_set_constraints("SET CONSTRAINTS c IMMEDIATE").unwrap();
    session.execute_set_constraints("SET CONSTRAINTS c IMMEDIATE").unwrap();
    session.execute_set_constraints("SET CONSTRAINTS ALL IMMEDIATE").unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);

    // deferring and restoring with nothing in between changes nothing
    session.insert("ref", vec![row![1]]).unwrap();
    session.insert("t", vec![row![1]]).unwrap();
    session.execute_set_constraints("SET CONSTRAINTS c DEFERRED").unwrap();
    session.execute_set_constraints("SET CONSTRAINTS c IMMEDIATE").unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);
    assert!(session.deferred_constraints().is_empty());
    session.commit().unwrap();
    assert_eq!(ctx.rows("t"), vec![row![1]]);
}

#[test]
fn test_not_deferrable_constraint() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk.not_deferrable());

    let mut session = ctx.session();
    let err = session
        .execute_set_constraints("SET CONSTRAINTS c DEFERRED")
        .unwrap_err();
    assert_eq!(err.sql_state(), "55000");

    session.execute_set_constraints("SET CONSTRAINTS c IMMEDIATE").unwrap();

    // ALL skips constraints that cannot be deferred
    session.execute_set_constraints("SET CONSTRAINTS ALL DEFERRED").unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);
    let err = session.insert("t", vec![row![7]]).unwrap_err();
    assert_eq!(err.sql_state(), "23503");
    session.rollback();
}

#[test]
fn test_set_constraints_name_errors() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    let err = session
        .execute_set_constraints("SET CONSTRAINTS nope DEFERRED")
        .unwrap_err();
    assert_eq!(err.sql_state(), "42X94");

    let err = session
        .execute_set_constraints("SET CONSTRAINTS c, nope DEFERRED")
        .unwrap_err();
    assert_eq!(err.sql_state(), "42X94");
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);

    let err = session.execute_set_constraints("SET CONSTRAINT c").unwrap_err();
    assert_eq!(err.sql_state(), "42X01");
}

#[test]
fn test_modes_reset_at_transaction_end() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, deferrable_fk);

    let mut session = ctx.session();
    session.execute_set_constraints("SET CONSTRAINTS ALL DEFERRED").unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Deferred);
    session.commit().unwrap();
    assert_eq!(session.constraint_mode("c").unwrap(), ConstraintMode::Immediate);

    session.execute_set_constraints("SET CONSTRAINTS c DEFERRED").unwrap();
    session.rollback();
    let err = session.insert("t", vec![row![9]]).unwrap_err();
    assert_eq!(err.sql_state(), "23503");
}

#[test]
fn test_deferred_check_constraint() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("pos")
            .column(int_column("i"))
            .constraint(ConstraintSpec::check("ck_pos", "i > 0").initially_deferred()),
    );

    let mut session = ctx.session();
    session.insert("pos", vec![row![-1], row![Value::Null]]).unwrap();
    session
        .update("pos", &[Assignment::new("i", "1")], Some("i = -1"))
        .unwrap();
    session.commit().unwrap();

    let mut session = ctx.session();
    session.insert("pos", vec![row![-5]]).unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23514");
    assert_eq!(ctx.rows("pos").len(), 2);
}

#[test]
fn test_immediate_check_constraint() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("pos")
            .column(int_column("i"))
            .constraint(ConstraintSpec::check("ck_pos", "i > 0")),
    );

    let mut session = ctx.session();
    session.insert("pos", vec![row![Value::Null], row![3]]).unwrap();
    let err = session.insert("pos", vec![row![0]]).unwrap_err();
    assert_eq!(err.sql_state(), "23513");
    session.commit().unwrap();
    assert_eq!(ctx.rows("pos").len(), 2);
}

#[test]
fn test_nullable_unique_allows_many_nulls() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("u")
            .column(int_column("i"))
            .constraint(ConstraintSpec::unique("u_i", ["i"])),
    );

    let mut session = ctx.session();
    session
        .insert("u", vec![row![Value::Null], row![Value::Null], row![1]])
        .unwrap();
    let err = session.insert("u", vec![row![1]]).unwrap_err();
    assert_eq!(err.sql_state(), "23505");
    session.commit().unwrap();
    assert_eq!(ctx.rows("u").len(), 3);
}

#[test]
fn test_identical_columns_use_distinct_indexes() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("u")
            .column(int_column("i"))
            .constraint(ConstraintSpec::unique("u_lazy", ["i"]).initially_deferred())
            .constraint(ConstraintSpec::unique("u_strict", ["i"])),
    );

    let mut session = ctx.session();
    session.insert("u", vec![row![1]]).unwrap();
    let err = session.insert("u", vec![row![1]]).unwrap_err();
    assert_eq!(err.as_constraint().and_then(|e| e.constraint()), Some("U_STRICT"));

    session.drop_constraint("u_strict").unwrap();
    session.insert("u", vec![row![1]]).unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23506");
    assert_eq!(err.as_constraint().and_then(|e| e.constraint()), Some("U_LAZY"));

    // the drop was rolled back with the transaction
    assert!(ctx.db.schema().constraint_by_name("u_strict").is_some());
}

#[test]
fn test_deferred_no_action_on_parent_delete() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk.initially_deferred());
    ctx.seed("ref", vec![row![1]]);
    ctx.seed("t", vec![row![1]]);

    let mut session = ctx.session();
    session.delete("ref", None).unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23516");
    assert_eq!(ctx.rows("ref"), vec![row![1]]);

    let mut session = ctx.session();
    session.delete("ref", None).unwrap();
    session.insert("ref", vec![row![1]]).unwrap();
    session.commit().unwrap();
    assert_eq!(ctx.rows("ref"), vec![row![1]]);
}

#[test]
fn test_self_referencing_cycle() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("emp")
            .column(int_column("id"))
            .column(int_column("boss"))
            .constraint(ConstraintSpec::primary_key("emp_pk", ["id"]))
            .constraint(ConstraintSpec::foreign_key("emp_boss", ["boss"], "emp").initially_deferred()),
    );

    let mut session = ctx.session();
    session.insert("emp", vec![row![1, 2]]).unwrap();
    session.insert("emp", vec![row![2, 1]]).unwrap();
    session.commit().unwrap();
    assert_eq!(ctx.rows("emp"), vec![row![1, 2], row![2, 1]]);

    let mut session = ctx.session();
    session.insert("emp", vec![row![3, 4]]).unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.sql_state(), "23516");
}

#[test]
fn test_ledger_spill_keeps_validation_exact() {
    let ctx = TestContext::with_constraints(ConstraintConfig::default().with_ledger_spill_threshold(2));
    setup_ref_and_child(&ctx, |fk| fk.initially_deferred());

    let mut session = ctx.session();
    for i in 0..10 {
        session.insert("t", vec![row![i]]).unwrap();
    }
    session
        .insert("ref", (0..10).filter(|i| *i != 7).map(|i| row![i]).collect())
        .unwrap();
    let err = session.commit().unwrap_err();
    match err.as_constraint() {
        Some(ConstraintError::DeferredViolation { key, .. }) => assert_eq!(key, &vec![Value::Int(7)]),
        other => panic!("unexpected error: {:?}", other),
    }

    let mut session = ctx.session();
    for i in 0..10 {
        session.insert("t", vec![row![i]]).unwrap();
    }
    session.insert("ref", (0..10).map(|i| row![i]).collect()).unwrap();
    session.commit().unwrap();
    assert_eq!(ctx.rows("t").len(), 10);
}

#[test]
fn test_insert_select_checks_after_all_rows() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("emp")
            .column(int_column("id"))
            .column(int_column("boss"))
            .constraint(ConstraintSpec::primary_key("emp_pk", ["id"]))
            .constraint(ConstraintSpec::foreign_key("emp_boss", ["boss"], "emp")),
    );
    ctx.create(
        TableSpec::new("staging")
            .column(int_column("id"))
            .column(int_column("boss")),
    );
    // children listed before their boss
    ctx.seed("staging", vec![row![2, 1], row![3, 1], row![1, Value::Null]]);

    let mut session = ctx.session();
    assert_eq!(session.insert_select("emp", "staging", None).unwrap(), 3);
    let err = session.insert_select("emp", "staging", Some("id = 1")).unwrap_err();
    assert_eq!(err.sql_state(), "23505");
    session.commit().unwrap();
    assert_eq!(ctx.rows("emp").len(), 3);
}

#[test]
fn test_failed_commit_starts_fresh_transaction() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk.initially_deferred());

    let mut session = ctx.session();
    session.insert("t", vec![row![1]]).unwrap();
    assert!(session.commit().is_err());
    assert!(!session.in_transaction());

    session.insert("ref", vec![row![1]]).unwrap();
    session.insert("t", vec![row![1]]).unwrap();
    session.commit().unwrap();
    assert_eq!(ctx.rows("t"), vec![row![1]]);
}

fn assert_commit_conflict(err: &deferdb_core::Error, expected_kind: ViolationKind, expected: &str) {
    assert_eq!(err.sql_state(), "40001");
    assert_eq!(err.scope(), ErrorScope::Transaction);
    match err.as_constraint() {
        Some(ConstraintError::CommitConflict {
            kind, constraint, key, ..
        }) => {
            assert_eq!(*kind, expected_kind);
            assert_eq!(constraint, expected);
            assert_eq!(key, &vec![Value::Int(1)]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_concurrent_duplicate_primary_key() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk);

    let mut first = ctx.session();
    let mut second = ctx.session();
    first.insert("ref", vec![row![1]]).unwrap();
    second.insert("ref", vec![row![1]]).unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert_commit_conflict(&err, ViolationKind::Duplicate, "REF_PK");

    assert!(!second.in_transaction());
    assert_eq!(ctx.rows("ref"), vec![row![1]]);
}

#[test]
fn test_concurrent_parent_delete_then_child_insert() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk);
    ctx.seed("ref", vec![row![1]]);

    let mut parent = ctx.session();
    let mut child = ctx.session();
    parent.delete("ref", None).unwrap();
    child.insert("t", vec![row![1]]).unwrap();

    parent.commit().unwrap();
    let err = child.commit().unwrap_err();
    assert_commit_conflict(&err, ViolationKind::ForeignKey, "C");

    assert!(ctx.rows("ref").is_empty());
    assert!(ctx.rows("t").is_empty());
}

#[test]
fn test_concurrent_child_insert_then_parent_delete() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk);
    ctx.seed("ref", vec![row![1]]);

    let mut parent = ctx.session();
    let mut child = ctx.session();
    parent.delete("ref", None).unwrap();
    child.insert("t", vec![row![1]]).unwrap();

    child.commit().unwrap();
    let err = parent.commit().unwrap_err();
    assert_commit_conflict(&err, ViolationKind::ForeignKey, "C");

    assert_eq!(ctx.rows("ref"), vec![row![1]]);
    assert_eq!(ctx.rows("t"), vec![row![1]]);
}

#[test]
fn test_concurrent_deferred_duplicate() {
    let ctx = TestContext::new();
    ctx.create(
        TableSpec::new("u")
            .column(int_column("i"))
            .constraint(ConstraintSpec::unique("u_key", ["i"]).initially_deferred()),
    );

    let mut first = ctx.session();
    let mut second = ctx.session();
    first.insert("u", vec![row![1]]).unwrap();
    second.insert("u", vec![row![1]]).unwrap();
    assert!(second.deferred_constraints().is_empty());

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert_commit_conflict(&err, ViolationKind::Duplicate, "U_KEY");
    assert_eq!(ctx.rows("u"), vec![row![1]]);
}

#[test]
fn test_concurrent_disjoint_keys_both_commit() {
    let ctx = TestContext::new();
    setup_ref_and_child(&ctx, |fk| fk);
    ctx.seed("ref", vec![row![1]]);

    let mut first = ctx.session();
    let mut second = ctx.session();
    first.insert("ref", vec![row![2]]).unwrap();
    first.insert("t", vec![row![1]]).unwrap();
    second.insert("ref", vec![row![3]]).unwrap();
    second.insert("t", vec![row![1]]).unwrap();

    first.commit().unwrap();
    second.commit().unwrap();
    assert_eq!(ctx.rows("ref"), vec![row![1], row![2], row![3]]);
    assert_eq!(ctx.rows("t"), vec![row![1], row![1]]);
}
