use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Pull dated log files from remote hosts into a local archive
#[derive(Debug, Parser)]
#[clap(name = "archiver", version)]
pub struct Cli {
    /// Path to the config file (yaml, toml or json)
    pub config: PathBuf,

    /// Log progress and every action taken
    #[clap(short, long)]
    pub verbose: bool,

    /// Print files that would be archived or pruned, change nothing
    #[clap(short = 'n', long)]
    pub dry_run: bool,

    /// Remove files from the remote once archived
    #[clap(long)]
    pub remove: bool,

    /// Allow keys held by ssh-agent
    #[clap(long)]
    pub use_ssh_agent: bool,

    /// Reference date for age calculations (default: today, local time)
    #[clap(long, value_name = "YYYY-MM-DD")]
    pub today: Option<NaiveDate>,

    /// Units processed at the same time (overrides the config file)
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Print the run summary as JSON on stdout
    #[clap(long)]
    pub json: bool,
}
