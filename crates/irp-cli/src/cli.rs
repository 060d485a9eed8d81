//! CLI argument definitions for `irp`.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `workflow get\|poll\|poll-batch` | Risk Modeler workflow status |
//! | `job get\|poll` | Platform job status by job kind |
//! | `edm search` | Search EDMs with a filter expression |
//! | `sql render\|query` | Data Bridge SQL templating and execution |
//! | `export download` | Download the results of a finished export job |
//!
//! Connection settings come from the environment (`RISK_MODELER_*`,
//! `MSSQL_*`). Results are printed to stdout as pretty JSON; logs go to
//! stderr.
//!
//! # Examples
//!
//! ```bash
//! irp workflow poll 4711 --interval-secs 15
//! irp job get analysis 98213
//! irp sql render "SELECT * FROM [{{ db }}].dbo.acc WHERE id = {{ id }}" -p db=EDM_A -p id=7
//! irp export download 55 --output-dir ./results
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use irp_core::{JobKind, PollConfig};

#[derive(Debug, Parser)]
#[command(
    name = "irp",
    author,
    version,
    about = "Risk Modeler platform command-line client"
)]
pub struct Cli {
    /// Log at debug level instead of info (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Risk Modeler workflows.
    Workflow(WorkflowArgs),
    /// Platform jobs by kind.
    Job(JobArgs),
    /// Exposure data managers.
    Edm(EdmArgs),
    /// Data Bridge SQL.
    Sql(SqlArgs),
    /// Export job results.
    Export(ExportArgs),
}

/// Polling interval and timeout flags.
#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    /// Seconds between status checks.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Seconds before giving up.
    #[arg(long, default_value_t = PollConfig::DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
}

impl PollArgs {
    /// Poll settings, starting from `defaults` for the interval.
    pub fn config(&self, defaults: PollConfig) -> Result<PollConfig, irp_core::ValidationError> {
        let interval = self
            .interval_secs
            .map_or(defaults.interval, Duration::from_secs);
        PollConfig::new(interval, Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub action: WorkflowAction,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowAction {
    /// Current status of one workflow.
    Get { workflow_id: i64 },
    /// Wait for one workflow to finish.
    Poll {
        workflow_id: i64,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Wait until none of the workflows is in progress.
    PollBatch {
        #[arg(required = true, num_args = 1..)]
        workflow_ids: Vec<i64>,
        #[command(flatten)]
        poll: PollArgs,
    },
}

/// Job families with their own status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKindArg {
    RiskData,
    Import,
    Geohaz,
    Analysis,
    Grouping,
    Export,
    RdmExport,
    DataVersionUpgrade,
}

impl JobKindArg {
    pub const fn kind(self) -> JobKind {
        match self {
            Self::RiskData => JobKind::RISK_DATA,
            Self::Import => JobKind::IMPORT,
            Self::Geohaz => JobKind::GEOHAZ,
            Self::Analysis => JobKind::ANALYSIS,
            Self::Grouping => JobKind::GROUPING,
            Self::Export => JobKind::EXPORT,
            Self::RdmExport => JobKind::RDM_EXPORT,
            Self::DataVersionUpgrade => JobKind::DATA_VERSION_UPGRADE,
        }
    }
}

#[derive(Debug, Args)]
pub struct JobArgs {
    #[command(subcommand)]
    pub action: JobAction,
}

#[derive(Debug, Subcommand)]
pub enum JobAction {
    /// Current status of one job.
    Get {
        #[arg(value_enum)]
        kind: JobKindArg,
        job_id: i64,
    },
    /// Wait for one job to finish.
    Poll {
        #[arg(value_enum)]
        kind: JobKindArg,
        job_id: i64,
        #[command(flatten)]
        poll: PollArgs,
    },
}

#[derive(Debug, Args)]
pub struct EdmArgs {
    #[command(subcommand)]
    pub action: EdmAction,
}

#[derive(Debug, Subcommand)]
pub enum EdmAction {
    /// Search EDMs, e.g. `exposureName LIKE "Q1*"`.
    Search {
        #[arg(default_value = "")]
        filter: String,
        /// Fetch every page instead of one.
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

/// SQL source and `{{ name }}` parameters shared by the SQL actions.
#[derive(Debug, Clone, Args)]
pub struct SqlSource {
    /// Inline SQL; mutually exclusive with `--file`.
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub query: Option<String>,

    /// Read the script from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// `name=value` parameter. Values that parse as JSON (numbers, `true`,
    /// `null`, quoted strings) keep their type; anything else is a string.
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    #[command(subcommand)]
    pub action: SqlAction,
}

#[derive(Debug, Subcommand)]
pub enum SqlAction {
    /// Print the SQL after parameter substitution.
    Render {
        #[command(flatten)]
        source: SqlSource,
    },
    /// Execute and print every result set as records.
    Query {
        #[command(flatten)]
        source: SqlSource,
        /// Connection name for `MSSQL_{NAME}_*` settings.
        #[arg(long)]
        connection: Option<String>,
        #[arg(long)]
        database: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub action: ExportAction,
}

#[derive(Debug, Subcommand)]
pub enum ExportAction {
    /// Download the archive of a finished export job.
    Download {
        job_id: i64,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}
