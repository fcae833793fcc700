//! Runs script statements against a session.

use deferdb_core::{Database, Session, Value};
use tracing::{debug, warn};

use crate::error::CliError;
use crate::formatter::{Formatter, RowSet};
use crate::script::{Script, ScriptLine, Statement};

/// Outcome of a whole script.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
}

pub struct Runner<'db> {
    session: Session<'db>,
    formatter: Box<dyn Formatter>,
    stop_on_error: bool,
}

impl<'db> Runner<'db> {
    pub fn new(db: &'db Database, formatter: Box<dyn Formatter>, stop_on_error: bool) -> Self {
        Self {
            session: db.session(),
            formatter,
            stop_on_error,
        }
    }

    /// Run every statement, printing one result per statement.
    ///
    /// A transaction still open at the end of the script is rolled back.
    pub fn run(&mut self, script: &Script) -> Result<RunSummary, CliError> {
        let mut summary = RunSummary::default();
        for line in &script.lines {
            summary.executed += 1;
            match self.execute(script, line) {
                Ok(output) => println!("{}", output),
                Err(CliError::Statement {
                    line,
                    sql_state,
                    source,
                }) if !self.stop_on_error => {
                    summary.failed += 1;
                    println!(
                        "{}",
                        self.formatter.format_error(line, sql_state, &source.to_string())
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if self.session.in_transaction() {
            warn!("script ended inside a transaction, rolling back");
            self.session.rollback();
        }
        Ok(summary)
    }

    /// Execute one statement and format its result.
    pub fn execute(&mut self, script: &Script, line: &ScriptLine) -> Result<String, CliError> {
        debug!(line = line.line, statement = %line.text, "executing");
        let failed = |source: deferdb_core::Error| CliError::Statement {
            line: line.line,
            sql_state: source.sql_state(),
            source,
        };
        let session = &mut self.session;
        let formatter = &self.formatter;

        let output = match &line.statement {
            Statement::CreateTable { table } => {
                session.create_table(table.clone()).map_err(failed)?;
                formatter.format_message(&format!("table {} created", table.name))
            }
            Statement::AddConstraint { table, constraint } => {
                session
                    .add_constraint(table, constraint.clone())
                    .map_err(failed)?;
                formatter.format_message(&format!("constraint added to {}", table))
            }
            Statement::DropConstraint { name } => {
                session.drop_constraint(name).map_err(failed)?;
                formatter.format_message(&format!("constraint {} dropped", name))
            }
            Statement::SetConstraints(stmt) => {
                session.set_constraints(stmt).map_err(failed)?;
                formatter.format_message(&stmt.to_string())
            }
            Statement::Insert { table, rows } => {
                let inserted = session.insert(table, rows.clone()).map_err(failed)?;
                formatter.format_affected(inserted, "")
            }
            Statement::InsertSelect {
                target,
                source,
                filter,
            } => {
                let inserted = session
                    .insert_select(target, source, filter.as_deref())
                    .map_err(failed)?;
                formatter.format_affected(inserted, "")
            }
            Statement::Update { table, set, filter } => {
                let updated = session
                    .update(table, set, filter.as_deref())
                    .map_err(failed)?;
                formatter.format_affected(updated, "")
            }
            Statement::Delete { table, filter } => {
                let deleted = session.delete(table, filter.as_deref()).map_err(failed)?;
                formatter.format_affected(deleted, "")
            }
            Statement::Select { table, filter } => {
                let rows = session.select(table, filter.as_deref()).map_err(failed)?;
                let schema = session.schema();
                let def = schema.resolve_table(table).map_err(failed)?;
                let columns: Vec<String> =
                    def.column_names().into_iter().map(str::to_string).collect();
                formatter.format_rows(&RowSet {
                    table: &def.qualified_name(),
                    columns: &columns,
                    rows: &rows,
                })
            }
            Statement::Import {
                table,
                rows,
                path,
                mode,
            } => {
                let rows = match path {
                    Some(path) => load_rows(&script.resolve(path))?,
                    None => rows.clone(),
                };
                let summary = session.import(table, rows, *mode).map_err(failed)?;
                formatter.format_affected(
                    summary.inserted,
                    &format!("imported, {} replaced row(s) deleted", summary.deleted),
                )
            }
            Statement::Commit => {
                session.commit().map_err(failed)?;
                formatter.format_message("committed")
            }
            Statement::Rollback => {
                session.rollback();
                formatter.format_message("rolled back")
            }
        };
        Ok(output)
    }
}

fn load_rows(path: &std::path::Path) -> Result<Vec<Vec<Value>>, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::ImportData {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{create_formatter, OutputFormat};

    const SCENARIO: &str = r#"
{"op": "create_table", "table": {"name": "ref", "columns": [{"name": "i", "type": "integer"}], "constraints": [{"name": "ref_pk", "type": "primary_key", "columns": ["i"]}]}}
{"op": "create_table", "table": {"name": "t", "columns": [{"name": "i", "type": "integer"}], "constraints": [{"name": "c", "type": "foreign_key", "columns": ["i"], "references": "ref", "deferrable": true}]}}
COMMIT
SET CONSTRAINTS c DEFERRED
{"op": "insert", "table": "t", "rows": [[2]]}
COMMIT
{"op": "select", "table": "t"}
SET CONSTRAINTS c DEFERRED
{"op": "insert", "table": "t", "rows": [[2]]}
{"op": "insert", "table": "ref", "rows": [[2]]}
COMMIT
"#;

    #[test]
    fn test_run_scenario() {
        let db = Database::temporary().unwrap();
        let script = Script::parse(SCENARIO).unwrap();
        let mut runner = Runner::new(&db, create_formatter(OutputFormat::Json), false);

        let summary = runner.run(&script).unwrap();
        assert_eq!(summary.executed, 11);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            db.session().select("t", None).unwrap(),
            vec![vec![Value::Int(2)]]
        );
    }

    #[test]
    fn test_stop_on_error() {
        let db = Database::temporary().unwrap();
        let script = Script::parse(SCENARIO).unwrap();
        let mut runner = Runner::new(&db, create_formatter(OutputFormat::Table), true);

        match runner.run(&script) {
            Err(CliError::Statement { line, sql_state, .. }) => {
                assert_eq!(line, 7);
                assert_eq!(sql_state, "23516");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rows.json"), "[[1], [2], [3]]").unwrap();
        let script_path = dir.path().join("load.txt");
        std::fs::write(
            &script_path,
            concat!(
                r#"{"op": "create_table", "table": {"name": "n", "columns": [{"name": "i", "type": "integer"}]}}"#,
                "\nCOMMIT\n",
                r#"{"op": "import", "table": "n", "path": "rows.json"}"#,
                "\n"
            ),
        )
        .unwrap();

        let db = Database::temporary().unwrap();
        let script = Script::load(&script_path).unwrap();
        let mut runner = Runner::new(&db, create_formatter(OutputFormat::Table), true);
        runner.run(&script).unwrap();
        assert_eq!(db.session().select("n", None).unwrap().len(), 3);

        std::fs::write(dir.path().join("bad.json"), r#"{"not": "rows"}"#).unwrap();
        let bad_path = dir.path().join("bad.txt");
        std::fs::write(&bad_path, r#"{"op": "import", "table": "n", "path": "bad.json"}"#).unwrap();
        let script = Script::load(&bad_path).unwrap();
        let mut runner = Runner::new(&db, create_formatter(OutputFormat::Table), false);
        assert!(matches!(runner.run(&script), Err(CliError::ImportData { .. })));
    }
}
