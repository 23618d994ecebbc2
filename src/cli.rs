use clap::{Args, Parser, Subcommand, ValueEnum};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use catalog_bulk_ops::domain::RunMode;

#[derive(Parser)]
#[command(
    name = "catalog-bulk-ops",
    version,
    about = "Batch clean-data runs over catalog stores and products"
)]
pub struct Cli {
    /// Layered config file (TOML/JSON/YAML); `BULKOPS_*` env vars override it.
    /// Without it the JSON config in the user config directory is used.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean stores or products through the backend
    Run(RunArgs),

    /// Show the activity timeline
    History {
        #[arg(long, help = "Show a single run log by id")]
        id: Option<String>,

        #[arg(long, help = "Number of recent entries to show")]
        limit: Option<u32>,

        #[arg(long, help = "Print entries as JSON")]
        json: bool,
    },
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(long, value_enum)]
    pub mode: ModeArg,

    /// JSON array of targets: `[{"id": "...", "label": "...", "kind": "store"}]`
    #[arg(long)]
    pub targets: PathBuf,

    #[arg(long, conflicts_with = "select", help = "Process every target of the mode's kind")]
    pub all: bool,

    #[arg(
        long,
        value_delimiter = ',',
        required_unless_present = "all",
        help = "Comma-separated target ids to process"
    )]
    pub select: Vec<String>,

    #[arg(
        long = "store",
        value_delimiter = ',',
        conflicts_with = "select",
        help = "Only take products from these comma-separated store ids (with --all)"
    )]
    pub stores: Vec<String>,

    #[arg(
        long,
        conflicts_with = "select",
        help = "Take at most N products from each store (with --all)"
    )]
    pub per_store_limit: Option<NonZeroUsize>,

    #[arg(long, short = 'y', help = "Skip the bulk confirmation prompt")]
    pub yes: bool,

    #[arg(long, help = "Retry the failed items once after the run completes")]
    pub retry_failed: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Stores,
    Products,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Stores => Self::Stores,
            ModeArg::Products => Self::Products,
        }
    }
}
