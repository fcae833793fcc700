//! Schema bundle - versioned snapshot of tables and constraints.

use rkyv::{Archive, Deserialize, Serialize};

use super::table::split_qualified;
use super::{ConstraintDef, ConstraintId, TableDef, TableId};
use crate::error::{CatalogError, Error};

/// A versioned snapshot of the entire schema.
///
/// Tables and constraints are kept in ascending id order.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version (monotonically increasing).
    pub version: u64,
    /// Table definitions.
    pub tables: Vec<TableDef>,
    /// Constraint definitions.
    pub constraints: Vec<ConstraintDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            tables: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Get a table by id.
    pub fn table(&self, id: TableId) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Get a table by id, failing if it is missing.
    pub fn require_table(&self, id: TableId) -> Result<&TableDef, Error> {
        self.table(id)
            .ok_or_else(|| CatalogError::not_found("table", id.to_string()).into())
    }

    /// Find a table by (optionally qualified) name.
    pub fn table_by_name(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.matches(name))
    }

    /// Find a table by name, failing with `ObjectNotFound`.
    pub fn resolve_table(&self, name: &str) -> Result<&TableDef, Error> {
        self.table_by_name(name)
            .ok_or_else(|| CatalogError::not_found("table", split_qualified(name).1).into())
    }

    /// Get a constraint by id.
    pub fn constraint(&self, id: ConstraintId) -> Option<&ConstraintDef> {
        self.constraints.iter().find(|c| c.id == id)
    }

    /// Get a constraint by id, failing if it is missing.
    pub fn require_constraint(&self, id: ConstraintId) -> Result<&ConstraintDef, Error> {
        self.constraint(id)
            .ok_or_else(|| CatalogError::not_found("constraint", id.to_string()).into())
    }

    /// Find a constraint by name.
    pub fn constraint_by_name(&self, name: &str) -> Option<&ConstraintDef> {
        let (_, name) = split_qualified(name);
        self.constraints.iter().find(|c| c.name == name)
    }

    /// All constraints owned by a table.
    pub fn constraints_on(&self, table: TableId) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints.iter().filter(move |c| c.table == table)
    }

    /// Foreign keys that reference the given key constraint.
    pub fn referencing(&self, key_constraint: ConstraintId) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints
            .iter()
            .filter(move |c| c.referenced_constraint() == Some(key_constraint))
    }

    /// Constraints that may be deferred.
    pub fn deferrable(&self) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints
            .iter()
            .filter(|c| c.characteristics.deferrable)
    }

    /// Add a table.
    pub fn add_table(&mut self, table: TableDef) -> Result<(), Error> {
        if self
            .tables
            .iter()
            .any(|t| t.schema == table.schema && t.name == table.name)
        {
            return Err(CatalogError::exists("table", table.qualified_name()).into());
        }
        self.tables.push(table);
        self.tables.sort_by_key(|t| t.id);
        Ok(())
    }

    /// Add a constraint.
    pub fn add_constraint(&mut self, constraint: ConstraintDef) -> Result<(), Error> {
        if self.constraint_by_name(&constraint.name).is_some() {
            return Err(CatalogError::exists("constraint", constraint.name).into());
        }
        self.constraints.push(constraint);
        self.constraints.sort_by_key(|c| c.id);
        Ok(())
    }

    /// Remove a constraint, returning it.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<ConstraintDef> {
        let pos = self.constraints.iter().position(|c| c.id == id)?;
        Some(self.constraints.remove(pos))
    }

    /// Serialize the schema bundle to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
