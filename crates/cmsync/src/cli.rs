//! Clap derive structures for the `cmsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cmsync -- publish headless-CMS models as CKAN datasets
#[derive(Debug, Parser)]
#[command(
    name = "cmsync",
    version,
    about = "Sync headless-CMS content into a CKAN data catalog",
    long_about = "Fetches items from a headless CMS, converts them to CSV and GeoJSON,\n\
        and creates or updates the matching datasets and resources in a\n\
        CKAN-style catalog. Runs one-off from the command line or as a\n\
        long-lived server with an HTTP API, a CMS webhook and a daily schedule.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "CMSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync configured models to the catalog
    #[command(alias = "s")]
    Sync(SyncArgs),

    /// Show per-model sync status
    Status,

    /// Show recent sync results, newest first
    History(HistoryArgs),

    /// List configured models
    Models,

    /// Check connectivity to the CMS and the catalog
    Test,

    /// Manage saved flexible-sync jobs
    Jobs(JobsArgs),

    /// Run the HTTP API, webhook endpoint and daily schedule
    Serve(ServeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Sync ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Model to sync (repeatable; all models when omitted)
    #[arg(long = "model", short = 'm', value_name = "MODEL")]
    pub models: Vec<String>,

    /// Fetch and transform without touching the catalog
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Delete managed resources before uploading
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Update existing resources in place, creating only what is missing
    #[arg(long, short = 'u')]
    pub smart: bool,

    /// Overwrite this resource with the CSV export
    #[arg(long, value_name = "ID")]
    pub resource_id: Option<String>,
}

// ── History ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,
}

// ── Jobs ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List saved jobs
    #[command(alias = "ls")]
    List,

    /// Show one saved job
    Show { job_id: Uuid },

    /// Save a flexible-sync request under a name
    Create {
        /// Job name
        #[arg(long)]
        name: String,

        /// JSON file holding the flexible-sync request
        #[arg(long, short = 'F', value_name = "FILE")]
        from_file: PathBuf,
    },

    /// Delete a saved job
    #[command(alias = "rm")]
    Delete { job_id: Uuid },

    /// Run a saved job now
    Run { job_id: Uuid },
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Do not start the daily sync
    #[arg(long)]
    pub no_schedule: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
