//! Referential actions on child rows.
//!
//! CASCADE and SET NULL run inline and synchronously, in the statement that
//! removed the referenced key, regardless of the foreign key's mode.

use tracing::debug;

use crate::catalog::{ConstraintDef, SchemaBundle, TableId};
use crate::error::Error;
use crate::storage::{IndexKey, RowId};
use crate::value::Value;

/// How a referenced key went away.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    /// The referenced row was deleted.
    Delete,
    /// The referenced key was updated to these values.
    Update(Vec<Value>),
}

/// Action applied to the child rows of a removed referenced key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineAction {
    Cascade,
    SetNull,
}

/// Child rows of `key` under `foreign_key` need `action`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub foreign_key: crate::catalog::ConstraintId,
    pub key: IndexKey,
    pub change: KeyChange,
    pub action: InlineAction,
    /// Nesting level of the statement that produced this request.
    pub depth: usize,
}

/// A row rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub row: RowId,
    pub old: Vec<Value>,
    pub new: Vec<Value>,
}

/// Write access used to carry out referential actions.
///
/// Mutations go through the same checkers as user statements.
pub trait RowMutator {
    /// Child rows currently carrying `key` under a foreign key.
    fn child_rows(
        &self,
        foreign_key: &ConstraintDef,
        key: &IndexKey,
    ) -> Result<Vec<(RowId, Vec<Value>)>, Error>;

    fn delete_rows(
        &mut self,
        table: TableId,
        rows: Vec<(RowId, Vec<Value>)>,
        depth: usize,
    ) -> Result<(), Error>;

    fn update_rows(
        &mut self,
        table: TableId,
        changes: Vec<RowChange>,
        depth: usize,
    ) -> Result<(), Error>;
}

/// Rows touched by referential actions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CascadeResult {
    pub deleted: usize,
    pub updated: usize,
    pub nullified: usize,
}

impl CascadeResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of affected rows.
    pub fn affected_count(&self) -> usize {
        self.deleted + self.updated + self.nullified
    }

    pub fn merge(&mut self, other: CascadeResult) {
        self.deleted += other.deleted;
        self.updated += other.updated;
        self.nullified += other.nullified;
    }
}

/// Applies CASCADE and SET NULL requests through a [`RowMutator`].
#[derive(Debug, Clone, Copy)]
pub struct ReferentialActionExecutor {
    max_depth: usize,
}

impl ReferentialActionExecutor {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn apply(
        &self,
        schema: &SchemaBundle,
        request: &ActionRequest,
        mutator: &mut dyn RowMutator,
    ) -> Result<CascadeResult, Error> {
        if request.depth > self.max_depth {
            return Err(Error::CascadeDepthExceeded {
                limit: self.max_depth,
            });
        }

        let mut result = CascadeResult::new();
        let fk = schema.require_constraint(request.foreign_key)?;
        let children = mutator.child_rows(fk, &request.key)?;
        if children.is_empty() {
            return Ok(result);
        }

        match (request.action, &request.change) {
            (InlineAction::Cascade, KeyChange::Delete) => {
                result.deleted = children.len();
                mutator.delete_rows(fk.table, children, request.depth)?;
            }
            (InlineAction::Cascade, KeyChange::Update(new_key)) => {
                result.updated = children.len();
                let changes = rewrite(fk, children, |i| {
                    new_key.get(i).cloned().unwrap_or(Value::Null)
                });
                mutator.update_rows(fk.table, changes, request.depth)?;
            }
            (InlineAction::SetNull, _) => {
                result.nullified = children.len();
                let changes = rewrite(fk, children, |_| Value::Null);
                mutator.update_rows(fk.table, changes, request.depth)?;
            }
        }

        debug!(
            constraint = %fk.name,
            action = ?request.action,
            depth = request.depth,
            affected = result.affected_count(),
            "referential action applied"
        );
        Ok(result)
    }
}

fn rewrite(
    fk: &ConstraintDef,
    children: Vec<(RowId, Vec<Value>)>,
    value_for: impl Fn(usize) -> Value,
) -> Vec<RowChange> {
    children
        .into_iter()
        .map(|(row, old)| {
            let mut new = old.clone();
            for (i, &col) in fk.columns.iter().enumerate() {
                if let Some(slot) = new.get_mut(col) {
                    *slot = value_for(i);
                }
            }
            RowChange { row, old, new }
        })
        .collect()
}
