//! CLI errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Script or data file could not be read.
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A script line is not a statement.
    #[error("line {line}: {message}")]
    Script { line: usize, message: String },

    /// Import data file is not a JSON array of rows.
    #[error("invalid import data in '{path}': {source}")]
    ImportData {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Database error outside a script statement.
    #[error(transparent)]
    Database(#[from] deferdb_core::Error),

    /// Script stopped at a failing statement.
    #[error("line {line}: [{sql_state}] {source}")]
    Statement {
        line: usize,
        sql_state: &'static str,
        #[source]
        source: deferdb_core::Error,
    },
}

impl CliError {
    pub fn script(line: usize, message: impl Into<String>) -> Self {
        CliError::Script {
            line,
            message: message.into(),
        }
    }
}
