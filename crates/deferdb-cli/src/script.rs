//! Scenario scripts.
//!
//! One statement per line. `COMMIT`, `ROLLBACK` and `SET CONSTRAINTS ...`
//! are written as text; every other statement is a JSON object tagged by
//! `op`:
//!
//! ```text
//! {"op": "create_table", "table": {"name": "ref", "columns": [{"name": "i", "type": "integer"}],
//!   "constraints": [{"name": "ref_pk", "type": "primary_key", "columns": ["i"]}]}}
//! SET CONSTRAINTS c DEFERRED
//! {"op": "insert", "table": "t", "rows": [[2]]}
//! COMMIT
//! ```
//!
//! Blank lines and lines starting with `#` or `--` are skipped.

use std::path::{Path, PathBuf};

use deferdb_core::{Assignment, ConstraintSpec, ImportMode, SetConstraints, TableSpec, Value};
use serde::Deserialize;

use crate::error::CliError;

/// A statement from a script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    CreateTable {
        table: TableSpec,
    },
    AddConstraint {
        table: String,
        constraint: ConstraintSpec,
    },
    DropConstraint {
        name: String,
    },
    #[serde(skip)]
    SetConstraints(SetConstraints),
    Insert {
        table: String,
        rows: Vec<Vec<Value>>,
    },
    InsertSelect {
        target: String,
        source: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Update {
        table: String,
        set: Vec<Assignment>,
        #[serde(default)]
        filter: Option<String>,
    },
    Delete {
        table: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Select {
        table: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Import {
        table: String,
        #[serde(default)]
        rows: Vec<Vec<Value>>,
        /// JSON file holding an array of rows, relative to the script.
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        mode: ImportMode,
    },
    Commit,
    Rollback,
}

/// A statement and the script line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLine {
    pub line: usize,
    pub text: String,
    pub statement: Statement,
}

/// A parsed script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub lines: Vec<ScriptLine>,
    /// Directory import paths are resolved against.
    pub base_dir: PathBuf,
}

impl Script {
    /// Read and parse a script file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut script = Self::parse(&content)?;
        script.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(script)
    }

    /// Parse script text.
    pub fn parse(content: &str) -> Result<Self, CliError> {
        let mut lines = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = index + 1;
            if let Some(statement) = parse_line(raw, line)? {
                lines.push(ScriptLine {
                    line,
                    text: raw.trim().to_string(),
                    statement,
                });
            }
        }
        Ok(Self {
            lines,
            base_dir: PathBuf::new(),
        })
    }

    /// Resolve a path named by an import statement.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Parse one line; `None` for blanks and comments.
pub fn parse_line(raw: &str, line: usize) -> Result<Option<Statement>, CliError> {
    let text = raw.trim();
    if text.is_empty() || text.starts_with('#') || text.starts_with("--") {
        return Ok(None);
    }

    let keyword = text.trim_end_matches(';').trim();
    if keyword.eq_ignore_ascii_case("COMMIT") {
        return Ok(Some(Statement::Commit));
    }
    if keyword.eq_ignore_ascii_case("ROLLBACK") {
        return Ok(Some(Statement::Rollback));
    }
    if starts_with_ignore_case(keyword, "SET ") {
        let stmt: SetConstraints = keyword
            .parse()
            .map_err(|e: deferdb_core::Error| CliError::script(line, e.to_string()))?;
        return Ok(Some(Statement::SetConstraints(stmt)));
    }
    if !text.starts_with('{') {
        return Err(CliError::script(
            line,
            format!("expected a JSON statement or SQL keyword, found '{}'", text),
        ));
    }

    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| CliError::script(line, e.to_string()))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
