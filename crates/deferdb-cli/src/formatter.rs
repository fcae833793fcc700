//! Output formatters for statement results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use deferdb_core::Value;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format, one object per statement
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Rows returned by a SELECT.
pub struct RowSet<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Vec<Value>],
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format selected rows.
    fn format_rows(&self, rows: &RowSet<'_>) -> String;

    /// Format a data-changing statement.
    fn format_affected(&self, affected: usize, message: &str) -> String;

    /// Format a failed statement.
    fn format_error(&self, line: usize, sql_state: &str, error: &str) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_rows(&self, rows: &RowSet<'_>) -> String {
        if rows.rows.is_empty() {
            return format!("{}: no rows", rows.table);
        }

        let mut table = Table::new();
        table.set_header(rows.columns.iter().map(Cell::new));
        for row in rows.rows {
            table.add_row(row.iter().map(|v| Cell::new(format_value(v))));
        }
        format!("{}\n{} row(s)", table, rows.rows.len())
    }

    fn format_affected(&self, affected: usize, message: &str) -> String {
        if message.is_empty() {
            format!("{} row(s) affected", affected)
        } else {
            format!("{} row(s) affected: {}", affected, message)
        }
    }

    fn format_error(&self, line: usize, sql_state: &str, error: &str) -> String {
        format!("Error (line {}) [{}]: {}", line, sql_state, error)
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_rows(&self, rows: &RowSet<'_>) -> String {
        let objects: Vec<serde_json::Value> = rows
            .rows
            .iter()
            .map(|row| {
                let fields = rows
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.clone(), value_to_json(value)))
                    .collect();
                serde_json::Value::Object(fields)
            })
            .collect();

        serde_json::json!({
            "table": rows.table,
            "rows": objects,
        })
        .to_string()
    }

    fn format_affected(&self, affected: usize, message: &str) -> String {
        serde_json::json!({
            "affected": affected,
            "message": message
        })
        .to_string()
    }

    fn format_error(&self, line: usize, sql_state: &str, error: &str) -> String {
        serde_json::json!({
            "line": line,
            "sql_state": sql_state,
            "error": error
        })
        .to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

/// Format a value for a table cell.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::String(s) => s.clone(),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<String>, Vec<Vec<Value>>) {
        (
            vec!["I".to_string(), "S".to_string()],
            vec![
                vec![Value::Int(1), Value::String("a".into())],
                vec![Value::Int(2), Value::Null],
            ],
        )
    }

    #[test]
    fn test_table_rows() {
        let (columns, rows) = sample();
        let output = TableFormatter.format_rows(&RowSet {
            table: "T",
            columns: &columns,
            rows: &rows,
        });
        assert!(output.contains("NULL"));
        assert!(output.ends_with("2 row(s)"));

        let empty = TableFormatter.format_rows(&RowSet {
            table: "T",
            columns: &columns,
            rows: &[],
        });
        assert_eq!(empty, "T: no rows");
    }

    #[test]
    fn test_json_rows() {
        let (columns, rows) = sample();
        let output = JsonFormatter.format_rows(&RowSet {
            table: "T",
            columns: &columns,
            rows: &rows,
        });
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["rows"][0]["S"], "a");
        assert!(parsed["rows"][1]["S"].is_null());
    }

    #[test]
    fn test_error_formats() {
        assert_eq!(
            TableFormatter.format_error(3, "23516", "boom"),
            "Error (line 3) [23516]: boom"
        );
        let parsed: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_error(3, "23516", "boom")).unwrap();
        assert_eq!(parsed["sql_state"], "23516");
    }
}
