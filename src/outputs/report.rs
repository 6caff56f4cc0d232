//! JSON run reports.
//!
//! Each run can leave a snapshot of its [`HarvestResult`] next to the archive,
//! grouped by UTC date:
//!
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── 080000.json
//!     └── 200000.json
//! ```

use crate::models::HarvestResult;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path of the report for a run started at `result.collected_at`.
pub fn report_path(report_dir: &Path, result: &HarvestResult) -> PathBuf {
    report_dir
        .join(result.collected_at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", result.collected_at.format("%H%M%S")))
}

/// Write `result` as pretty JSON under `report_dir`.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_report(
    result: &HarvestResult,
    report_dir: &Path,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(result)?;
    let path = report_path(report_dir, result);

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), records = result.records.len(), "Wrote run report");
    Ok(path)
}
