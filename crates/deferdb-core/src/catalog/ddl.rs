//! DDL descriptions of tables and constraints, resolved against a schema.

use std::collections::HashSet;

use super::table::{normalize_ident, split_qualified, DEFAULT_SCHEMA};
use super::{
    Characteristics, ColumnDef, ColumnType, ConstraintDef, ConstraintId, ConstraintKind,
    IndexHandle, ReferentialAction, SchemaBundle, TableDef, TableId,
};
use crate::constraint::ConstraintMode;
use crate::error::{CatalogError, Error};
use crate::expr::ExpressionEvaluator;

/// A column in a `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// A nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Declare the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Add an inline constraint.
    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Build the table definition. Primary key columns become NOT NULL.
    pub(crate) fn resolve(&self, id: TableId) -> Result<TableDef, Error> {
        let (schema, name) = split_qualified(&self.name);
        if self.columns.is_empty() {
            return Err(CatalogError::InvalidDefinition(format!(
                "table '{}' has no columns",
                name
            ))
            .into());
        }

        let pk_columns: HashSet<String> = self
            .constraints
            .iter()
            .filter(|c| matches!(c.kind, ConstraintSpecKind::PrimaryKey))
            .flat_map(|c| c.columns.iter().map(|n| normalize_ident(n)))
            .collect();

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let col_name = normalize_ident(&col.name);
            if !seen.insert(col_name.clone()) {
                return Err(CatalogError::exists("column", col_name).into());
            }
            columns.push(ColumnDef {
                nullable: col.nullable && !pk_columns.contains(&col_name),
                name: col_name,
                column_type: col.column_type,
            });
        }

        Ok(TableDef {
            id,
            schema: schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            name,
            columns,
        })
    }
}

/// Constraint kind as written in DDL.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintSpecKind {
    PrimaryKey,
    Unique,
    ForeignKey {
        references: String,
        /// Referenced columns; empty means the referenced table's primary key.
        #[serde(default)]
        referenced_columns: Vec<String>,
        #[serde(default)]
        on_delete: ReferentialAction,
        #[serde(default)]
        on_update: ReferentialAction,
    },
    Check {
        expression: String,
    },
}

/// A constraint as written in `CREATE TABLE` or `ALTER TABLE ... ADD CONSTRAINT`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConstraintSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: ConstraintSpecKind,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub deferrable: Option<bool>,
    #[serde(default)]
    pub initially: Option<ConstraintMode>,
}

impl ConstraintSpec {
    fn with_kind(
        name: impl Into<String>,
        kind: ConstraintSpecKind,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            kind,
            columns: columns.into_iter().map(Into::into).collect(),
            deferrable: None,
            initially: None,
        }
    }

    /// `CONSTRAINT name PRIMARY KEY (columns)`.
    pub fn primary_key(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::with_kind(name, ConstraintSpecKind::PrimaryKey, columns)
    }

    /// `CONSTRAINT name UNIQUE (columns)`.
    pub fn unique(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::with_kind(name, ConstraintSpecKind::Unique, columns)
    }

    /// `CONSTRAINT name FOREIGN KEY (columns) REFERENCES table`.
    pub fn foreign_key(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        references: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            ConstraintSpecKind::ForeignKey {
                references: references.into(),
                referenced_columns: Vec::new(),
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
            columns,
        )
    }

    /// `CONSTRAINT name CHECK (expression)`.
    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            ConstraintSpecKind::Check {
                expression: expression.into(),
            },
            Vec::<String>::new(),
        )
    }

    /// Reference specific columns instead of the primary key.
    pub fn referencing_columns(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        if let ConstraintSpecKind::ForeignKey {
            referenced_columns, ..
        } = &mut self.kind
        {
            *referenced_columns = columns.into_iter().map(Into::into).collect();
        }
        self
    }

    /// `ON DELETE action`.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let ConstraintSpecKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = action;
        }
        self
    }

    /// `ON UPDATE action`.
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let ConstraintSpecKind::ForeignKey { on_update, .. } = &mut self.kind {
            *on_update = action;
        }
        self
    }

    /// `DEFERRABLE`.
    pub fn deferrable(mut self) -> Self {
        self.deferrable = Some(true);
        self
    }

    /// `NOT DEFERRABLE`.
    pub fn not_deferrable(mut self) -> Self {
        self.deferrable = Some(false);
        self
    }

    /// `INITIALLY DEFERRED`.
    pub fn initially_deferred(mut self) -> Self {
        self.initially = Some(ConstraintMode::Deferred);
        self
    }

    /// `INITIALLY IMMEDIATE`.
    pub fn initially_immediate(mut self) -> Self {
        self.initially = Some(ConstraintMode::Immediate);
        self
    }

    /// Order in which inline constraints of one table are registered.
    pub(crate) fn registration_rank(&self) -> u8 {
        match self.kind {
            ConstraintSpecKind::PrimaryKey => 0,
            ConstraintSpecKind::Unique => 1,
            ConstraintSpecKind::ForeignKey { .. } => 2,
            ConstraintSpecKind::Check { .. } => 3,
        }
    }

    /// Whether the constraint needs a dedicated index handle.
    pub(crate) fn needs_index(&self) -> bool {
        !matches!(self.kind, ConstraintSpecKind::Check { .. })
    }

    /// Resolve column names and references into a registry definition.
    ///
    /// `strict_pk_nullability` rejects primary keys over nullable columns, used
    /// when adding a key to an existing table.
    pub(crate) fn resolve(
        &self,
        schema: &SchemaBundle,
        table: &TableDef,
        id: ConstraintId,
        index: Option<IndexHandle>,
        strict_pk_nullability: bool,
    ) -> Result<ConstraintDef, Error> {
        let name = match &self.name {
            Some(n) => split_qualified(n).1,
            None => format!("SQL{:012}", id),
        };
        if schema.constraint_by_name(&name).is_some() {
            return Err(CatalogError::exists("constraint", name).into());
        }

        let characteristics = self.characteristics(&name)?;
        let columns = self.resolve_columns(table, &name)?;

        let kind = match &self.kind {
            ConstraintSpecKind::PrimaryKey => {
                if strict_pk_nullability {
                    if let Some(&c) = columns.iter().find(|&&c| table.columns[c].nullable) {
                        return Err(CatalogError::InvalidDefinition(format!(
                            "primary key '{}' cannot include nullable column '{}'",
                            name, table.columns[c].name
                        ))
                        .into());
                    }
                }
                if schema
                    .constraints_on(table.id)
                    .any(|c| matches!(c.kind, ConstraintKind::PrimaryKey))
                {
                    return Err(CatalogError::InvalidDefinition(format!(
                        "table '{}' already has a primary key",
                        table.qualified_name()
                    ))
                    .into());
                }
                ConstraintKind::PrimaryKey
            }
            ConstraintSpecKind::Unique => ConstraintKind::Unique,
            ConstraintSpecKind::ForeignKey {
                references,
                referenced_columns,
                on_delete,
                on_update,
            } => {
                let target_table = schema.resolve_table(references)?;
                let target = Self::find_referenced_key(schema, target_table, referenced_columns, &name)?;

                if target.columns.len() != columns.len() {
                    return Err(CatalogError::InvalidDefinition(format!(
                        "foreign key '{}' has {} columns but the referenced key has {}",
                        name,
                        columns.len(),
                        target.columns.len()
                    ))
                    .into());
                }
                for (&child, &parent) in columns.iter().zip(&target.columns) {
                    let ct = table.columns[child].column_type;
                    let pt = target_table.columns[parent].column_type;
                    if ct != pt {
                        return Err(CatalogError::InvalidDefinition(format!(
                            "foreign key '{}' column '{}' has type {:?} but references {:?}",
                            name, table.columns[child].name, ct, pt
                        ))
                        .into());
                    }
                }
                if *on_delete == ReferentialAction::SetNull || *on_update == ReferentialAction::SetNull {
                    if let Some(&c) = columns.iter().find(|&&c| !table.columns[c].nullable) {
                        return Err(CatalogError::InvalidDefinition(format!(
                            "SET NULL on foreign key '{}' requires nullable column '{}'",
                            name, table.columns[c].name
                        ))
                        .into());
                    }
                }

                ConstraintKind::ForeignKey {
                    referenced_constraint: target.id,
                    referenced_table: target_table.id,
                    on_delete: *on_delete,
                    on_update: *on_update,
                }
            }
            ConstraintSpecKind::Check { expression } => {
                ExpressionEvaluator::validate_predicate(expression, table)?;
                ConstraintKind::Check {
                    expression: expression.clone(),
                }
            }
        };

        Ok(ConstraintDef {
            id,
            name,
            table: table.id,
            kind,
            columns,
            characteristics,
            index,
        })
    }

    fn characteristics(&self, name: &str) -> Result<Characteristics, Error> {
        let initially = self.initially.unwrap_or(ConstraintMode::Immediate);
        let deferrable = match (self.deferrable, initially) {
            (Some(false), ConstraintMode::Deferred) => {
                return Err(CatalogError::InconsistentCharacteristics {
                    constraint: name.to_string(),
                }
                .into())
            }
            (Some(d), _) => d,
            // INITIALLY DEFERRED implies DEFERRABLE
            (None, ConstraintMode::Deferred) => true,
            (None, ConstraintMode::Immediate) => false,
        };
        Ok(Characteristics {
            deferrable,
            initially,
        })
    }

    fn resolve_columns(&self, table: &TableDef, name: &str) -> Result<Vec<usize>, Error> {
        if matches!(self.kind, ConstraintSpecKind::Check { .. }) {
            return Ok(Vec::new());
        }
        if self.columns.is_empty() {
            return Err(CatalogError::InvalidDefinition(format!(
                "constraint '{}' names no columns",
                name
            ))
            .into());
        }

        let mut positions = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let pos = table.column_index(col).ok_or_else(|| {
                CatalogError::not_found("column", format!("{}.{}", table.name, normalize_ident(col)))
            })?;
            if positions.contains(&pos) {
                return Err(CatalogError::InvalidDefinition(format!(
                    "column '{}' appears twice in constraint '{}'",
                    table.columns[pos].name, name
                ))
                .into());
            }
            positions.push(pos);
        }
        Ok(positions)
    }

    fn find_referenced_key<'s>(
        schema: &'s SchemaBundle,
        target: &TableDef,
        referenced_columns: &[String],
        name: &str,
    ) -> Result<&'s ConstraintDef, Error> {
        let wanted: Option<Vec<usize>> = if referenced_columns.is_empty() {
            None
        } else {
            let mut positions = Vec::with_capacity(referenced_columns.len());
            for col in referenced_columns {
                positions.push(target.column_index(col).ok_or_else(|| {
                    CatalogError::not_found(
                        "column",
                        format!("{}.{}", target.name, normalize_ident(col)),
                    )
                })?);
            }
            Some(positions)
        };

        schema
            .constraints_on(target.id)
            .find(|c| match &wanted {
                None => matches!(c.kind, ConstraintKind::PrimaryKey),
                Some(cols) => c.is_key() && &c.columns == cols,
            })
            .ok_or_else(|| {
                CatalogError::InvalidDefinition(format!(
                    "foreign key '{}' references '{}' which has no matching primary key or unique constraint",
                    name,
                    target.qualified_name()
                ))
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent_schema() -> SchemaBundle {
        let mut schema = SchemaBundle::new(1);
        let spec = TableSpec::new("ref_t")
            .column(ColumnSpec::new("i", ColumnType::Integer))
            .column(ColumnSpec::new("j", ColumnType::Integer))
            .constraint(ConstraintSpec::primary_key("pk", ["i"]));
        let table = spec.resolve(1).unwrap();
        assert!(!table.columns[0].nullable);
        schema.add_table(table.clone()).unwrap();
        let pk = spec.constraints[0]
            .resolve(&schema, &table, 2, Some(IndexHandle(3)), false)
            .unwrap();
        schema.add_constraint(pk).unwrap();
        schema
    }

    fn child_table() -> TableDef {
        TableSpec::new("t")
            .column(ColumnSpec::new("i", ColumnType::Integer))
            .column(ColumnSpec::new("name", ColumnType::Varchar).not_null())
            .resolve(10)
            .unwrap()
    }

    #[test]
    fn test_resolve_foreign_key_to_primary_key() {
        let schema = parent_schema();
        let fk = ConstraintSpec::foreign_key("fk", ["i"], "ref_t")
            .on_delete(ReferentialAction::Cascade)
            .initially_deferred()
            .resolve(&schema, &child_table(), 11, Some(IndexHandle(12)), false)
            .unwrap();

        assert_eq!(fk.name, "FK");
        assert_eq!(fk.referenced_constraint(), Some(2));
        assert!(fk.characteristics.deferrable);
        assert_eq!(fk.characteristics.initially, ConstraintMode::Deferred);
    }

    #[test]
    fn test_inconsistent_characteristics() {
        let schema = parent_schema();
        let err = ConstraintSpec::unique("u", ["i"])
            .not_deferrable()
            .initially_deferred()
            .resolve(&schema, &child_table(), 11, Some(IndexHandle(12)), false)
            .unwrap_err();
        assert_eq!(err.sql_state(), "42X97");
    }

    #[test]
    fn test_set_null_requires_nullable_column() {
        let mut schema = parent_schema();
        let mut parent = schema.table(1).unwrap().clone();
        parent.id = 20;
        parent.name = "P2".into();
        parent.columns[1].column_type = ColumnType::Varchar;
        schema.add_table(parent.clone()).unwrap();
        let uk = ConstraintSpec::unique("u2", ["j"])
            .resolve(&schema, &parent, 21, Some(IndexHandle(22)), false)
            .unwrap();
        schema.add_constraint(uk).unwrap();

        let err = ConstraintSpec::foreign_key("fk", ["name"], "p2")
            .referencing_columns(["j"])
            .on_delete(ReferentialAction::SetNull)
            .resolve(&schema, &child_table(), 11, Some(IndexHandle(12)), false)
            .unwrap_err();
        assert!(matches!(err, Error::Catalog(CatalogError::InvalidDefinition(_))));
    }

    #[test]
    fn test_unknown_references() {
        let schema = parent_schema();
        let err = ConstraintSpec::foreign_key("fk", ["i"], "nope")
            .resolve(&schema, &child_table(), 11, None, false)
            .unwrap_err();
        assert_eq!(err.sql_state(), "42X94");

        let err = ConstraintSpec::unique("u", ["zz"])
            .resolve(&schema, &child_table(), 11, None, false)
            .unwrap_err();
        assert_eq!(err.sql_state(), "42X94");
    }

    #[test]
    fn test_check_expression_validated() {
        let schema = parent_schema();
        assert!(ConstraintSpec::check("ck", "i > 0")
            .resolve(&schema, &child_table(), 11, None, false)
            .is_ok());
        assert!(ConstraintSpec::check("ck", "k > 0")
            .resolve(&schema, &child_table(), 11, None, false)
            .is_err());
    }

    #[test]
    fn test_generated_name() {
        let schema = parent_schema();
        let def = ConstraintSpec {
            name: None,
            ..ConstraintSpec::unique("x", ["i"])
        }
        .resolve(&schema, &child_table(), 42, Some(IndexHandle(43)), false)
        .unwrap();
        assert_eq!(def.name, "SQL000000000042");
    }

    #[test]
    fn test_spec_from_json() {
        let spec: ConstraintSpec = serde_json::from_str(
            r#"{"name": "c", "type": "foreign_key", "columns": ["i"], "references": "ref_t",
                "on_delete": "set_null", "initially": "deferred"}"#,
        )
        .unwrap();
        assert_eq!(spec.initially, Some(ConstraintMode::Deferred));
        assert!(matches!(
            spec.kind,
            ConstraintSpecKind::ForeignKey {
                on_delete: ReferentialAction::SetNull,
                ..
            }
        ));
    }
}
