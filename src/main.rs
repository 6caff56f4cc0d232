//! # Feed Harvester
//!
//! An incremental news and announcement harvester. For every configured
//! source (RSS/Atom feeds, Google News searches, HTML listing pages, JSON
//! APIs) it fetches candidate items, normalizes them, drops anything already
//! archived or off-topic, optionally translates titles, and appends the new
//! records to a single CSV archive.
//!
//! ## Usage
//!
//! ```sh
//! feed_harvester -c harvest.yaml
//! feed_harvester -c harvest.yaml --only gov-policy --dry-run -r ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Configuration**: one YAML file lists the archive path and the sources
//! 2. **Fetching**: each source adapter makes one request and streams raw items
//! 3. **Normalization**: titles, links and publication dates are cleaned up
//! 4. **Filtering**: history and in-run duplicates, keywords and caps
//! 5. **Output**: one atomic append to the CSV archive, plus an optional JSON report

use clap::Parser;
use std::collections::HashSet;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod enrich;
mod error;
mod fetch;
mod filter;
mod harvest;
mod models;
mod normalize;
mod outputs;
mod scrapers;
mod utils;

use cli::Cli;
use config::{HarvestConfig, SourceConfig};
use enrich::HttpTranslator;
use error::HarvestError;
use fetch::Fetcher;
use harvest::{Harvester, Source};
use normalize::Normalizer;
use outputs::csv::CsvSink;
use outputs::report;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("feed_harvester starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), dry_run = args.dry_run, only = ?args.only, "Parsed CLI arguments");

    let mut config = HarvestConfig::load(&args.config).await.map_err(|e| {
        error!(error = %e, "Cannot load configuration");
        e
    })?;
    if let Some(output) = &args.output {
        config.output = output.clone();
    }

    let selected = select_sources(&config.sources, &args.only).map_err(|e| {
        error!(error = %e, "Unknown source requested");
        HarvestError::config(&args.config, e)
    })?;

    // Fail before fetching anything if the archive cannot be written
    if !args.dry_run {
        let archive_dir = config.output.parent().unwrap_or(std::path::Path::new("."));
        if let Err(e) = ensure_writable_dir(archive_dir).await {
            error!(
                path = %archive_dir.display(),
                error = %e,
                "Archive directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    let fetcher = Fetcher::new(&config.http)?;
    let translator = config
        .translate
        .clone()
        .map(|t| HttpTranslator::new(fetcher.client().clone(), t));
    if translator.is_none() && selected.iter().any(|s| s.translate) {
        warn!("Some sources ask for translation but no `translate` service is configured");
    }

    let sources: Vec<Source> = selected.into_iter().map(Source::from_config).collect();
    info!(count = sources.len(), output = %config.output.display(), "Sources ready");

    let harvester = Harvester::new(
        CsvSink::new(&config.output),
        Normalizer::new(&config.normalize),
        fetcher,
        translator,
    )
    .dry_run(args.dry_run);

    let result = match harvester.run(&sources).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Harvest failed; archive left as it was");
            return Err(e.into());
        }
    };

    if let Some(report_dir) = &args.report_dir {
        if let Err(e) = report::write_report(&result, report_dir).await {
            error!(error = %e, "Failed to write run report");
        }
    }

    for source in result.sources.iter().filter(|s| !s.available) {
        warn!(source = %source.source_id, "Source was unavailable this run");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        new_records = result.records.len(),
        committed = result.committed,
        "Execution complete"
    );

    Ok(())
}

/// Sources to run: all of them, or only the ids given with `--only`.
fn select_sources<'a>(
    sources: &'a [SourceConfig],
    only: &[String],
) -> Result<Vec<&'a SourceConfig>, String> {
    if only.is_empty() {
        return Ok(sources.iter().collect());
    }
    let known: HashSet<&str> = sources.iter().map(|s| s.id.as_str()).collect();
    if let Some(missing) = only.iter().find(|id| !known.contains(id.as_str())) {
        return Err(format!("no source with id `{missing}`"));
    }
    Ok(sources
        .iter()
        .filter(|s| only.iter().any(|id| id == &s.id))
        .collect())
}
