//! Table and column definitions.

use rkyv::{Archive, Deserialize, Serialize};

use crate::value::Value;

/// Identifier of a table, allocated by the catalog.
pub type TableId = u64;

/// Schema used when a table name is not qualified.
pub const DEFAULT_SCHEMA: &str = "APP";

/// Fold an SQL identifier to its canonical upper-case form.
pub fn normalize_ident(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Column data type.
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
pub enum ColumnType {
    /// Boolean.
    Boolean,
    /// 64-bit integer.
    Integer,
    /// Double precision float.
    Double,
    /// Character data.
    Varchar,
}

impl ColumnType {
    /// Coerce a value to this type, or `None` if it cannot be stored here.
    ///
    /// NULL is accepted by every type; nullability is checked separately.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Boolean, v @ Value::Bool(_)) => Some(v),
            (ColumnType::Integer, v @ Value::Int(_)) => Some(v),
            (ColumnType::Integer, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(f as i64)),
            (ColumnType::Double, v @ Value::Float(_)) => Some(v),
            (ColumnType::Double, Value::Int(i)) => Some(Value::Float(i as f64)),
            (ColumnType::Varchar, v @ Value::String(_)) => Some(v),
            _ => None,
        }
    }
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name (normalized).
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether NULL may be stored.
    pub nullable: bool,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct TableDef {
    /// Table identifier.
    pub id: TableId,
    /// Schema name (normalized).
    pub schema: String,
    /// Table name (normalized).
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// `SCHEMA.NAME` form used in messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = normalize_ident(name);
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether `name` (qualified or not) refers to this table.
    pub fn matches(&self, name: &str) -> bool {
        let (schema, table) = split_qualified(name);
        table == self.name && schema.map_or(true, |s| s == self.schema)
    }
}

/// Split `schema.table` into its normalized parts.
pub(crate) fn split_qualified(name: &str) -> (Option<String>, String) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(normalize_ident(schema)), normalize_ident(table)),
        None => (None, normalize_ident(name)),
    }
}
