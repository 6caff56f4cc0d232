//! Error taxonomy for a harvest run.
//!
//! Every failure the harvester can hit falls into one of these kinds, and each
//! kind has exactly one recovery action:
//!
//! | Kind | Scope | Recovery |
//! |------|-------|----------|
//! | [`HarvestError::SourceUnavailable`] | one source | skip the source, zero items this run |
//! | [`HarvestError::ParseFailure`] | one item | skip the item |
//! | [`HarvestError::EnrichmentFailure`] | one item | keep the raw / untranslated value |
//! | [`HarvestError::PersistenceFailure`] | whole run | fatal, surfaced to the operator |
//! | [`HarvestError::Config`] | whole run | fatal, before anything is fetched |

use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("source `{source_id}` unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("unparseable item from `{source_id}`: {reason}")]
    ParseFailure { source_id: String, reason: String },

    #[error("enrichment failed: {reason}")]
    EnrichmentFailure { reason: String },

    #[error("cannot persist {}: {reason}", path.display())]
    PersistenceFailure { path: PathBuf, reason: String },

    #[error("invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl HarvestError {
    pub fn unavailable(source_id: &str, reason: impl Display) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(source_id: &str, reason: impl Display) -> Self {
        Self::ParseFailure {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn enrichment(reason: impl Display) -> Self {
        Self::EnrichmentFailure {
            reason: reason.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        Self::PersistenceFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Only persistence and configuration problems abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PersistenceFailure { .. } | Self::Config { .. })
    }
}
