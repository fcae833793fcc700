//! Core error types.

use std::fmt;

use thiserror::Error;

use crate::catalog::ReferentialAction;
use crate::expr::EvaluationError;
use crate::value::{KeyDisplay, Value};

/// How much work an error undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    /// Only the failing statement is rolled back.
    Statement,
    /// The whole transaction is rolled back.
    Transaction,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Statement => write!(f, "statement"),
            ErrorScope::Transaction => write!(f, "transaction"),
        }
    }
}

/// Kind of constraint a deferred violation was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Duplicate key in a deferred primary key or unique constraint.
    Duplicate,
    /// Orphaned child key in a deferred foreign key.
    ForeignKey,
    /// Row failing a deferred check constraint.
    Check,
}

/// Constraint violations raised by the row checkers and validators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstraintError {
    /// Immediate duplicate in a primary key or unique constraint.
    #[error(
        "the statement was aborted because it would have caused a duplicate key value {} in unique or primary key constraint '{constraint}' on '{table}'",
        KeyDisplay(.key)
    )]
    DuplicateKey {
        constraint: String,
        table: String,
        key: Vec<Value>,
    },

    /// Child row references a key that does not exist.
    #[error(
        "insert or update on table '{table}' caused a violation of foreign key constraint '{constraint}' for key {}: no matching row in '{referenced_table}'",
        KeyDisplay(.key)
    )]
    ForeignKeyViolation {
        constraint: String,
        table: String,
        referenced_table: String,
        key: Vec<Value>,
    },

    /// Referenced key removed while child rows still point at it.
    #[error(
        "delete or update on table '{referenced_table}' caused a violation of foreign key constraint '{constraint}' ({action}) for key {}: still referenced from '{table}'",
        KeyDisplay(.key)
    )]
    ReferencedKeyViolation {
        constraint: String,
        table: String,
        referenced_table: String,
        key: Vec<Value>,
        action: ReferentialAction,
    },

    /// Row fails an immediate check constraint.
    #[error("the check constraint '{constraint}' on '{table}' was violated while performing an insert or update: {expression}")]
    CheckViolation {
        constraint: String,
        table: String,
        expression: String,
    },

    /// NULL written into a NOT NULL column.
    #[error("column '{column}' of table '{table}' cannot accept a NULL value")]
    NotNullViolation { table: String, column: String },

    /// Attempt to defer a constraint declared NOT DEFERRABLE.
    #[error("constraint '{constraint}' is not deferrable")]
    NotDeferrable { constraint: String },

    /// `ADD CONSTRAINT` of an immediate foreign key over orphaned rows.
    #[error(
        "foreign key constraint '{constraint}' cannot be added to or enabled on table '{table}' because one or more foreign keys do not have matching referenced keys in '{referenced_table}' (first offending key {})",
        KeyDisplay(.key)
    )]
    AddForeignKeyViolation {
        constraint: String,
        table: String,
        referenced_table: String,
        key: Vec<Value>,
    },

    /// Violation of a deferred constraint found by structural re-validation.
    #[error(
        "{scope} aborted: deferred {} constraint '{constraint}' on '{table}' is violated for key {}",
        kind_label(.kind),
        KeyDisplay(.key)
    )]
    DeferredViolation {
        scope: ErrorScope,
        kind: ViolationKind,
        constraint: String,
        table: String,
        referenced_table: Option<String>,
        key: Vec<Value>,
    },

    /// A key checked by this transaction no longer holds against what other
    /// sessions committed in the meantime.
    #[error(
        "transaction aborted: a concurrently committed transaction conflicts with {} constraint '{constraint}' on '{table}' for key {}",
        kind_label(.kind),
        KeyDisplay(.key)
    )]
    CommitConflict {
        kind: ViolationKind,
        constraint: String,
        table: String,
        key: Vec<Value>,
    },
}

fn kind_label(kind: &ViolationKind) -> &'static str {
    match kind {
        ViolationKind::Duplicate => "unique",
        ViolationKind::ForeignKey => "foreign key",
        ViolationKind::Check => "check",
    }
}

impl ConstraintError {
    /// SQLSTATE reported for this violation.
    pub fn sql_state(&self) -> &'static str {
        match self {
            ConstraintError::DuplicateKey { .. } => "23505",
            ConstraintError::ForeignKeyViolation { .. }
            | ConstraintError::ReferencedKeyViolation { .. } => "23503",
            ConstraintError::CheckViolation { .. } => "23513",
            ConstraintError::NotNullViolation { .. } => "23502",
            ConstraintError::NotDeferrable { .. } => "55000",
            ConstraintError::AddForeignKeyViolation { .. } => "X0Y45",
            ConstraintError::DeferredViolation { scope, kind, .. } => match (kind, scope) {
                (ViolationKind::Duplicate, ErrorScope::Transaction) => "23506",
                (ViolationKind::Duplicate, ErrorScope::Statement) => "23507",
                (ViolationKind::ForeignKey, ErrorScope::Transaction) => "23516",
                (ViolationKind::ForeignKey, ErrorScope::Statement) => "23517",
                (ViolationKind::Check, ErrorScope::Transaction) => "23514",
                (ViolationKind::Check, ErrorScope::Statement) => "23515",
            },
            ConstraintError::CommitConflict { .. } => "40001",
        }
    }

    /// Scope of the rollback this violation causes.
    pub fn scope(&self) -> ErrorScope {
        match self {
            ConstraintError::DeferredViolation { scope, .. } => *scope,
            ConstraintError::CommitConflict { .. } => ErrorScope::Transaction,
            _ => ErrorScope::Statement,
        }
    }

    /// Name of the violated constraint, when there is one.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            ConstraintError::DuplicateKey { constraint, .. }
            | ConstraintError::ForeignKeyViolation { constraint, .. }
            | ConstraintError::ReferencedKeyViolation { constraint, .. }
            | ConstraintError::CheckViolation { constraint, .. }
            | ConstraintError::NotDeferrable { constraint }
            | ConstraintError::AddForeignKeyViolation { constraint, .. }
            | ConstraintError::DeferredViolation { constraint, .. }
            | ConstraintError::CommitConflict { constraint, .. } => Some(constraint),
            ConstraintError::NotNullViolation { .. } => None,
        }
    }
}

/// Schema and DDL errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    /// Named object does not exist.
    #[error("{kind} '{name}' does not exist")]
    ObjectNotFound { kind: String, name: String },

    /// Named object already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// NOT DEFERRABLE combined with INITIALLY DEFERRED.
    #[error("constraint '{constraint}' has inconsistent characteristics: NOT DEFERRABLE cannot be INITIALLY DEFERRED")]
    InconsistentCharacteristics { constraint: String },

    /// Constraint cannot be dropped while others depend on it.
    #[error("constraint '{constraint}' cannot be dropped because '{dependent}' depends on it")]
    DependentConstraint { constraint: String, dependent: String },

    /// Structurally invalid definition.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}

impl CatalogError {
    pub(crate) fn not_found(kind: &str, name: impl Into<String>) -> Self {
        CatalogError::ObjectNotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    pub(crate) fn exists(kind: &str, name: impl Into<String>) -> Self {
        CatalogError::AlreadyExists {
            kind: kind.to_string(),
            name: name.into(),
        }
    }
}

/// Core database errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// Constraint violation.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    /// Schema error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Expression evaluation error.
    #[error("expression error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Statement text could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Referential actions nested too deeply.
    #[error("referential action depth limit of {limit} exceeded")]
    CascadeDepthExceeded { limit: usize },

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Scope of the rollback this error causes.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Constraint(e) => e.scope(),
            Error::Storage(_) | Error::Transaction(_) => ErrorScope::Transaction,
            _ => ErrorScope::Statement,
        }
    }

    /// SQLSTATE for this error.
    pub fn sql_state(&self) -> &'static str {
        match self {
            Error::Constraint(e) => e.sql_state(),
            Error::Catalog(CatalogError::ObjectNotFound { .. }) => "42X94",
            Error::Catalog(CatalogError::AlreadyExists { .. }) => "X0Y32",
            Error::Catalog(CatalogError::InconsistentCharacteristics { .. }) => "42X97",
            Error::Catalog(CatalogError::DependentConstraint { .. }) => "X0Y25",
            Error::Catalog(CatalogError::InvalidDefinition(_)) => "42X93",
            Error::Syntax(_) | Error::Evaluation(EvaluationError::InvalidSyntax(_)) => "42X01",
            Error::Evaluation(EvaluationError::UnknownColumn(_)) => "42X04",
            Error::Evaluation(_) => "22018",
            Error::CascadeDepthExceeded { .. } => "54001",
            Error::InvalidData(_) => "22005",
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Deserialization(_)
            | Error::InvalidKey
            | Error::Transaction(_) => "XJ001",
        }
    }

    /// The constraint violation carried by this error, if any.
    pub fn as_constraint(&self) -> Option<&ConstraintError> {
        match self {
            Error::Constraint(e) => Some(e),
            _ => None,
        }
    }
}
