//! deferdb scenario runner
//!
//! Runs a script of DDL, DML, `SET CONSTRAINTS` and transaction statements
//! against a local database and prints each statement's result.

mod error;
mod formatter;
mod runner;
mod script;

use std::path::PathBuf;

use clap::Parser;
use deferdb_core::{ConstraintConfig, Database, EngineConfig};
use tracing::info;

use error::CliError;
use formatter::OutputFormat;
use runner::Runner;
use script::Script;

/// deferdb scenario runner
#[derive(Parser, Debug)]
#[command(name = "deferdb")]
#[command(version, about = "Run constraint scenarios against a deferdb database")]
pub struct Args {
    /// Script to run
    pub script: PathBuf,

    /// Database directory; a temporary database is used when omitted
    #[arg(long, conflicts_with = "temporary")]
    pub db: Option<PathBuf>,

    /// Use a temporary database, the default without --db
    #[arg(long)]
    pub temporary: bool,

    /// Deferred keys held in memory per transaction before spilling to disk
    #[arg(long)]
    pub spill_threshold: Option<usize>,

    /// Maximum nesting of cascading referential actions
    #[arg(long)]
    pub max_cascade_depth: Option<usize>,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Stop at the first failing statement
    #[arg(long)]
    pub stop_on_error: bool,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deferdb=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let script = Script::load(&args.script)?;
    let db = Database::open(engine_config(&args))?;

    let mut runner = Runner::new(&db, formatter::create_formatter(args.format), args.stop_on_error);
    let summary = runner.run(&script)?;
    db.flush()?;

    info!(
        executed = summary.executed,
        failed = summary.failed,
        "script finished"
    );
    Ok(())
}

fn engine_config(args: &Args) -> EngineConfig {
    let mut constraints = ConstraintConfig::default();
    if let Some(threshold) = args.spill_threshold {
        constraints = constraints.with_ledger_spill_threshold(threshold);
    }
    if let Some(depth) = args.max_cascade_depth {
        constraints = constraints.with_max_cascade_depth(depth);
    }

    let config = match &args.db {
        Some(path) if !args.temporary => EngineConfig::new(path),
        _ => EngineConfig::temporary(),
    };
    config.with_constraints(constraints)
}
