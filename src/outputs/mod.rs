//! Output of a harvest run.
//!
//! # Submodules
//!
//! - [`csv`]: the durable CSV archive and the [`csv::PersistenceSink`] trait
//! - [`report`]: optional per-run JSON report
//!
//! # Output Structure
//!
//! ```text
//! data/
//! └── harvest.csv            # archive, appended every run
//!
//! report_dir/
//! └── 2025-05-06/
//!     └── 080000.json        # one report per run
//! ```

pub mod csv;
pub mod report;
