//! CLI argument definitions for docharvest.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Ingest this instance's partition of the universe |
//! | `plan` | Print this instance's partition without fetching |
//! | `coverage` | Report stored documents per entity and type |
//! | `failures` | List failed units of a run as a re-runnable unit list |
//!
//! # Examples
//!
//! ```bash
//! # Instance 2 of 4 over the master entity list
//! docharvest run --instance 2 --total 4 --entities entities.txt
//!
//! # Re-run only what failed last time
//! docharvest failures --output failed.json
//! docharvest run --instance 1 --total 1 --units failed.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use docharvest_core::DocumentType;

/// docharvest - resumable multi-worker ingestion of financial documents
#[derive(Debug, Parser)]
#[command(
    name = "docharvest",
    author,
    version,
    about = "Resumable multi-worker ingestion of financial documents"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Configuration file (defaults to `<home>/docharvest.toml`).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Warehouse database file, overriding the configuration.
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest this instance's partition.
    ///
    /// Units already covered in the warehouse are skipped without a fetch, so the
    /// same command resumes after a crash or restart.
    Run(RunArgs),

    /// Print this instance's partition as JSON without fetching anything.
    Plan(PlanArgs),

    /// Report stored documents per entity and document type.
    Coverage(CoverageArgs),

    /// List failed units that are still uncovered.
    Failures(FailuresArgs),
}

/// Selects the slice of the universe an instance owns.
#[derive(Debug, Clone, Args)]
pub struct PartitionArgs {
    /// This instance's 1-based index.
    #[arg(long)]
    pub instance: u32,

    /// Number of instances sharing the universe.
    #[arg(long)]
    pub total: u32,

    /// Master entity list (JSON array or one id per line).
    #[arg(long, value_name = "FILE", required_unless_present = "units")]
    pub entities: Option<PathBuf>,

    /// Explicit unit list replacing the enumerated universe.
    #[arg(long, value_name = "FILE", conflicts_with = "entities")]
    pub units: Option<PathBuf>,

    /// Only process one document type.
    #[arg(long, value_enum)]
    pub doc_type: Option<DocTypeArg>,

    /// Only process these entities (repeatable).
    #[arg(long = "entity", value_name = "ID")]
    pub entities_filter: Vec<String>,

    /// Keep only the first N units of the partition.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub partition: PartitionArgs,

    /// Run identifier for the ingest ledger (defaults to a random UUID).
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub partition: PartitionArgs,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    /// Restrict the report to these entities (repeatable).
    #[arg(long = "entity", value_name = "ID")]
    pub entities: Vec<String>,

    /// List every covered unit instead of per-type aggregates.
    #[arg(long, default_value_t = false)]
    pub detailed: bool,
}

#[derive(Debug, Args)]
pub struct FailuresArgs {
    /// Run to inspect (defaults to the most recent run).
    #[arg(long)]
    pub run_id: Option<String>,

    /// Only failures of this instance.
    #[arg(long)]
    pub instance: Option<u32>,

    /// Also write the units to FILE for `run --units`.
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocTypeArg {
    AnnualReport,
    CallTranscript,
}

impl From<DocTypeArg> for DocumentType {
    fn from(value: DocTypeArg) -> Self {
        match value {
            DocTypeArg::AnnualReport => Self::AnnualReport,
            DocTypeArg::CallTranscript => Self::CallTranscript,
        }
    }
}
