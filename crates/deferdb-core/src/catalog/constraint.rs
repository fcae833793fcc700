//! Constraint definitions held by the registry.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use super::TableId;
use crate::constraint::ConstraintMode;

/// Identifier of a constraint. Allocated monotonically, so ascending ids follow
/// creation order.
pub type ConstraintId = u64;

/// Dedicated key-access path owned by exactly one constraint.
///
/// Handles are allocated from the catalog id generator and never derived from
/// column lists, so two constraints over identical columns never share one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize,
)]
pub struct IndexHandle(pub u64);

impl IndexHandle {
    /// Big-endian prefix under which this handle's entries are stored.
    pub fn prefix(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

/// Action taken on child rows when a referenced key disappears.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Checked when the statement ends; follows the foreign key's mode.
    #[default]
    NoAction,
    /// Checked at once, in every mode.
    Restrict,
    /// Delete or re-key the children.
    Cascade,
    /// Null the children's foreign key columns.
    SetNull,
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferentialAction::NoAction => write!(f, "NO ACTION"),
            ReferentialAction::Restrict => write!(f, "RESTRICT"),
            ReferentialAction::Cascade => write!(f, "CASCADE"),
            ReferentialAction::SetNull => write!(f, "SET NULL"),
        }
    }
}

/// Declared timing characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Characteristics {
    /// Whether `SET CONSTRAINTS ... DEFERRED` may apply.
    pub deferrable: bool,
    /// Mode at the start of every transaction.
    pub initially: ConstraintMode,
}

impl Default for Characteristics {
    fn default() -> Self {
        Self {
            deferrable: false,
            initially: ConstraintMode::Immediate,
        }
    }
}

/// What a constraint enforces.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Unique key; NULL-bearing keys are exempt.
    Unique,
    /// Foreign key into a primary key or unique constraint.
    ForeignKey {
        /// The referenced primary key or unique constraint.
        referenced_constraint: ConstraintId,
        /// Table owning the referenced constraint.
        referenced_table: TableId,
        /// Action for deletes of referenced rows.
        on_delete: ReferentialAction,
        /// Action for updates of referenced keys.
        on_update: ReferentialAction,
    },
    /// Boolean row predicate.
    Check {
        /// Expression text.
        expression: String,
    },
}

/// A registered constraint.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Constraint identifier.
    pub id: ConstraintId,
    /// Constraint name (normalized, unique in the schema).
    pub name: String,
    /// Owning table.
    pub table: TableId,
    /// Kind and kind-specific data.
    pub kind: ConstraintKind,
    /// Column positions in the owning table.
    pub columns: Vec<usize>,
    /// Declared timing.
    pub characteristics: Characteristics,
    /// Key-access handle for key constraints.
    pub index: Option<IndexHandle>,
}

impl ConstraintDef {
    /// Primary key or unique.
    pub fn is_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique)
    }

    /// Foreign key.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }

    /// Check constraint.
    pub fn is_check(&self) -> bool {
        matches!(self.kind, ConstraintKind::Check { .. })
    }

    /// The referenced key constraint, for foreign keys.
    pub fn referenced_constraint(&self) -> Option<ConstraintId> {
        match self.kind {
            ConstraintKind::ForeignKey {
                referenced_constraint,
                ..
            } => Some(referenced_constraint),
            _ => None,
        }
    }

    /// Declared action for the given referenced-side change.
    pub fn action_for(&self, change: KeyChangeKind) -> ReferentialAction {
        match (&self.kind, change) {
            (ConstraintKind::ForeignKey { on_delete, .. }, KeyChangeKind::Delete) => *on_delete,
            (ConstraintKind::ForeignKey { on_update, .. }, KeyChangeKind::Update) => *on_update,
            _ => ReferentialAction::NoAction,
        }
    }

    /// Extract this constraint's column values from a row.
    pub fn project(&self, row: &[crate::value::Value]) -> Vec<crate::value::Value> {
        self.columns
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(crate::value::Value::Null))
            .collect()
    }

    /// Short label used in logs and reports.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey { .. } => "FOREIGN KEY",
            ConstraintKind::Check { .. } => "CHECK",
        }
    }
}

/// How a referenced key went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyChangeKind {
    /// The row was deleted.
    Delete,
    /// The key columns were updated.
    Update,
}
