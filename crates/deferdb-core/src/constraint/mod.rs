//! Constraint enforcement.
//!
//! Row checkers run as part of every data-modifying statement. Each one
//! either enforces its constraint at once or, when the constraint is
//! currently deferred, records work in the transaction's [`DeferredLedger`].
//! Deferred work is validated when a constraint is switched back to
//! IMMEDIATE and before commit. Every checked key also lands in the
//! transaction's [`WriteSet`] and is examined again before commit, against
//! whatever other sessions committed in the meantime.

pub mod actions;
mod check;
mod context;
mod foreign_key;
pub mod ledger;
mod mode;
mod processing;
mod referenced_key;
mod uniqueness;
mod validator;
mod write_set;

pub use actions::{
    ActionRequest, CascadeResult, InlineAction, KeyChange, ReferentialActionExecutor, RowChange,
    RowMutator,
};
pub use check::CheckConstraintChecker;
pub use context::TransactionContext;
pub use foreign_key::ForeignKeyChecker;
pub use ledger::{DeferredEntry, DeferredLedger, DeferredOperation, LedgerMark};
pub use mode::{ConstraintMode, ConstraintModeTable, ConstraintTarget, SetConstraints};
pub use processing::{RowProcessing, StatementKind};
pub use referenced_key::ReferencedKeyChecker;
pub use uniqueness::UniquenessChecker;
pub use validator::{CommitValidator, ConstraintValidator};
pub use write_set::WriteSet;
