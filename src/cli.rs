use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lotwatch")]
#[command(about = "Harvests vehicle listings into a local history database and enriches them by VIN")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to <config dir>/lotwatch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides store.path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also append log output to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive every sub-source until exhausted and persist the listings
    Acquire(AcquireArgs),

    /// Look up specs, safety ratings, recalls and complaints for the backlog
    Enrich(EnrichArgs),

    /// Ingest a saved response payload
    Import(ImportArgs),

    /// Show database counts and enrichment backlog
    Status(StatusArgs),
}

#[derive(Parser)]
pub struct AcquireArgs {
    /// Directory of recorded sub-source pages to replay
    #[arg(long)]
    pub replay: PathBuf,

    /// Search zip code
    #[arg(long)]
    pub zip: Option<String>,

    /// Search radius in miles
    #[arg(long)]
    pub radius: Option<u32>,

    /// Oldest model year to include
    #[arg(long)]
    pub min_year: Option<i32>,

    /// Skip the politeness delay between rounds
    #[arg(long, default_value_t = false)]
    pub no_delay: bool,
}

#[derive(Parser)]
pub struct EnrichArgs {
    /// Number of worker threads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Minimum interval between lookup requests, e.g. "500ms"
    #[arg(long)]
    pub rate_limit: Option<String>,

    /// VINs per decode request (at most 50)
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Parser)]
pub struct ImportArgs {
    /// JSON payload in the captured response format
    pub file: PathBuf,

    /// Snapshot date to stamp the rows with (defaults to today)
    #[arg(long)]
    pub date: Option<chrono::NaiveDate>,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
