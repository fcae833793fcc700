//! Constraint modes and the `SET CONSTRAINTS` statement.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};

use crate::catalog::{normalize_ident, ConstraintDef, ConstraintId, SchemaBundle};
use crate::error::{CatalogError, ConstraintError, Error};

/// When a constraint is checked.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintMode {
    /// At the end of every statement.
    Immediate,
    /// At commit, or when switched back to immediate.
    Deferred,
}

impl fmt::Display for ConstraintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintMode::Immediate => write!(f, "IMMEDIATE"),
            ConstraintMode::Deferred => write!(f, "DEFERRED"),
        }
    }
}

/// Which constraints a `SET CONSTRAINTS` applies to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintTarget {
    /// Every deferrable constraint.
    All,
    /// The named constraints.
    Named(Vec<String>),
}

/// `SET CONSTRAINTS {ALL | name [, name]*} {DEFERRED | IMMEDIATE}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SetConstraints {
    pub target: ConstraintTarget,
    pub mode: ConstraintMode,
}

impl SetConstraints {
    pub fn all(mode: ConstraintMode) -> Self {
        Self {
            target: ConstraintTarget::All,
            mode,
        }
    }

    pub fn named(names: impl IntoIterator<Item = impl Into<String>>, mode: ConstraintMode) -> Self {
        Self {
            target: ConstraintTarget::Named(names.into_iter().map(Into::into).collect()),
            mode,
        }
    }

    /// Resolve the target to constraint ids, in ascending order.
    ///
    /// `ALL` covers deferrable constraints only. Naming an unknown constraint
    /// fails, as does deferring a constraint that is not deferrable.
    pub fn resolve(&self, schema: &SchemaBundle) -> Result<Vec<ConstraintId>, Error> {
        let mut ids = BTreeSet::new();
        match &self.target {
            ConstraintTarget::All => {
                ids.extend(schema.deferrable().map(|c| c.id));
            }
            ConstraintTarget::Named(names) => {
                for name in names {
                    let def = schema
                        .constraint_by_name(name)
                        .ok_or_else(|| CatalogError::not_found("constraint", normalize_ident(name)))?;
                    if self.mode == ConstraintMode::Deferred && !def.characteristics.deferrable {
                        return Err(ConstraintError::NotDeferrable {
                            constraint: def.name.clone(),
                        }
                        .into());
                    }
                    ids.insert(def.id);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }
}

impl FromStr for SetConstraints {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = |msg: &str| Error::Syntax(format!("{}: {}", msg, s.trim()));

        let text = s.trim().trim_end_matches(';');
        let tokens: Vec<String> = text
            .replace(',', " , ")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let keyword = |i: usize, kw: &str| tokens.get(i).is_some_and(|t| t.eq_ignore_ascii_case(kw));
        if !keyword(0, "SET") || !keyword(1, "CONSTRAINTS") {
            return Err(syntax("expected SET CONSTRAINTS"));
        }
        if tokens.len() < 4 {
            return Err(syntax("incomplete SET CONSTRAINTS"));
        }

        let last = tokens.len() - 1;
        let mode = if keyword(last, "DEFERRED") {
            ConstraintMode::Deferred
        } else if keyword(last, "IMMEDIATE") {
            ConstraintMode::Immediate
        } else {
            return Err(syntax("expected DEFERRED or IMMEDIATE"));
        };

        let list = &tokens[2..last];
        if list.len() == 1 && list[0].eq_ignore_ascii_case("ALL") {
            return Ok(Self::all(mode));
        }

        // name (, name)*
        let mut names = Vec::new();
        for (i, token) in list.iter().enumerate() {
            let expect_name = i % 2 == 0;
            match (expect_name, token.as_str()) {
                (true, ",") => return Err(syntax("expected constraint name")),
                (true, name) => {
                    if name.eq_ignore_ascii_case("ALL") {
                        return Err(syntax("ALL cannot be combined with names"));
                    }
                    names.push(name.to_string());
                }
                (false, ",") => {}
                (false, _) => return Err(syntax("expected ','")),
            }
        }
        if list.len() % 2 == 0 {
            return Err(syntax("trailing ','"));
        }

        Ok(Self::named(names, mode))
    }
}

impl fmt::Display for SetConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ConstraintTarget::All => write!(f, "SET CONSTRAINTS ALL {}", self.mode),
            ConstraintTarget::Named(names) => {
                write!(f, "SET CONSTRAINTS {} {}", names.join(", "), self.mode)
            }
        }
    }
}

/// Per-transaction constraint modes.
///
/// Holds only overrides; a constraint without one is in its declared initial mode.
#[derive(Debug, Default, Clone)]
pub struct ConstraintModeTable {
    overrides: HashMap<ConstraintId, ConstraintMode>,
}

impl ConstraintModeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode of a constraint.
    pub fn mode(&self, def: &ConstraintDef) -> ConstraintMode {
        self.overrides
            .get(&def.id)
            .copied()
            .unwrap_or(def.characteristics.initially)
    }

    /// Whether the constraint is currently deferred.
    pub fn is_deferred(&self, def: &ConstraintDef) -> bool {
        self.mode(def) == ConstraintMode::Deferred
    }

    /// Override a constraint's mode for the rest of the transaction.
    pub(crate) fn set(&mut self, id: ConstraintId, mode: ConstraintMode) {
        self.overrides.insert(id, mode);
    }

    /// Drop any override for a constraint.
    pub(crate) fn forget(&mut self, id: ConstraintId) {
        self.overrides.remove(&id);
    }

    /// Number of overridden constraints.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}
