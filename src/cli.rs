//! Command-line interface definitions for the feed harvester.
//!
//! Every option can also come from an environment variable.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for one harvest run.
///
/// # Examples
///
/// ```sh
/// # Harvest every configured source into the configured archive
/// feed_harvester -c harvest.yaml
///
/// # Two sources only, no commit, keep a JSON report of what would be added
/// feed_harvester -c harvest.yaml --only gov-policy --only gnews-ai --dry-run -r ./reports
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the harvest configuration (YAML)
    #[arg(short, long, env = "HARVEST_CONFIG", default_value = "harvest.yaml")]
    pub config: PathBuf,

    /// Archive path; overrides `output` from the config file
    #[arg(short, long, env = "HARVEST_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Directory for per-run JSON reports
    #[arg(short, long, env = "HARVEST_REPORT_DIR")]
    pub report_dir: Option<PathBuf>,

    /// Fetch and filter, but do not write the archive
    #[arg(long, env = "HARVEST_DRY_RUN")]
    pub dry_run: bool,

    /// Harvest only the source with this id (repeatable; comma-separated in the env var)
    #[arg(long = "only", value_name = "SOURCE_ID", env = "HARVEST_ONLY", value_delimiter = ',')]
    pub only: Vec<String>,
}
