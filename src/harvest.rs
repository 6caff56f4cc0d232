//! The harvest run: every configured source, one commit.
//!
//! ```text
//! load history ─► for each source (in config order):
//!                   fetch ─► normalize ─► [translate] ─► dedup/relevance/cap ─► stage
//!             ─► merge order ─► single append to the archive
//! ```
//!
//! Sources run one after another. A source that cannot be reached is skipped
//! and counted; only a failure to read or write the archive aborts the run.
//! When the commit itself fails, the staged records are handed to
//! [`PersistenceSink::rescue`] before the error is returned.

use crate::config::{DedupBy, SourceConfig};
use crate::enrich::{Translate, translate_title};
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::filter::{FilterEngine, SourcePolicy, Verdict, merge_order};
use crate::models::{CanonicalRecord, HarvestResult, HarvestStats, SourceStats};
use crate::normalize::Normalizer;
use crate::outputs::csv::PersistenceSink;
use crate::scrapers::{SourceAdapter, build_adapter};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

/// One source of a run: where items come from and what to keep.
pub struct Source {
    pub adapter: Box<dyn SourceAdapter>,
    pub policy: SourcePolicy,
}

impl Source {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            adapter: build_adapter(config),
            policy: SourcePolicy::from_config(config),
        }
    }

    pub fn id(&self) -> &str {
        self.adapter.source_id()
    }
}

pub struct Harvester<S, T> {
    sink: S,
    normalizer: Normalizer,
    fetcher: Fetcher,
    translator: Option<T>,
    dry_run: bool,
}

impl<S, T> Harvester<S, T>
where
    S: PersistenceSink,
    T: Translate,
{
    pub fn new(sink: S, normalizer: Normalizer, fetcher: Fetcher, translator: Option<T>) -> Self {
        Self {
            sink,
            normalizer,
            fetcher,
            translator,
            dry_run: false,
        }
    }

    /// Fetch and filter as usual but leave the archive alone.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self, sources: &[Source]) -> Result<HarvestResult, HarvestError> {
        self.run_at(sources, Utc::now()).await
    }

    /// Run with a fixed harvest timestamp.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), dry_run = self.dry_run))]
    pub async fn run_at(
        &self,
        sources: &[Source],
        collected_at: DateTime<Utc>,
    ) -> Result<HarvestResult, HarvestError> {
        let history = self.sink.load_history().await?;
        let mut engine = FilterEngine::new(&history);
        let mut staged = Vec::new();
        let mut stats = HarvestStats::default();
        let mut per_source = Vec::with_capacity(sources.len());

        for source in sources {
            let source_stats = self
                .harvest_source(source, &mut engine, collected_at, &mut staged)
                .await;
            stats.absorb(&source_stats);
            per_source.push(source_stats);
        }

        let records = merge_order(staged);
        let committed = if self.dry_run {
            info!(records = records.len(), "Dry run; archive not written");
            0
        } else {
            self.commit(sources, &records, collected_at).await?
        };

        info!(
            new = records.len(),
            committed,
            seen = stats.seen,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            sources_ok = stats.sources_ok,
            sources_unavailable = stats.sources_unavailable,
            "Harvest complete"
        );

        Ok(HarvestResult {
            collected_at,
            records,
            stats,
            sources: per_source,
            committed,
        })
    }

    /// Append under each source's own dedup policy. On failure the records
    /// are rescued and the original error returned.
    async fn commit(
        &self,
        sources: &[Source],
        records: &[CanonicalRecord],
        collected_at: DateTime<Utc>,
    ) -> Result<usize, HarvestError> {
        let policies: HashMap<&str, DedupBy> = sources
            .iter()
            .map(|s| (s.id(), s.policy.dedup_by))
            .collect();
        let dedup_by = |r: &CanonicalRecord| {
            policies
                .get(r.source_id.as_str())
                .copied()
                .unwrap_or(DedupBy::Url)
        };

        match self.sink.append(records, &dedup_by).await {
            Ok(committed) => {
                if committed < records.len() {
                    warn!(
                        staged = records.len(),
                        committed,
                        "Some staged records were already in the archive at commit"
                    );
                }
                Ok(committed)
            }
            Err(e) if records.is_empty() => Err(e),
            Err(e) => {
                match self.sink.rescue(records, collected_at).await {
                    Ok(path) => error!(
                        error = %e,
                        records = records.len(),
                        rescue = %path.display(),
                        "Commit failed; staged records saved for recovery"
                    ),
                    Err(rescue_err) => error!(
                        error = %e,
                        %rescue_err,
                        records = records.len(),
                        "Commit failed and staged records could not be saved"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Drain one source into `staged`. Never fails: every problem ends up in
    /// the returned counters.
    #[instrument(level = "info", skip_all, fields(source = %source.id()))]
    async fn harvest_source(
        &self,
        source: &Source,
        engine: &mut FilterEngine<'_>,
        collected_at: DateTime<Utc>,
        staged: &mut Vec<CanonicalRecord>,
    ) -> SourceStats {
        let id = source.id();
        let policy = &source.policy;
        let mut stats = SourceStats::new(id);

        let mut items = match source.adapter.fetch(&self.fetcher).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Source unavailable; skipping this run");
                stats.available = false;
                return stats;
            }
        };

        while let Some(item) = items.next().await {
            stats.seen += 1;
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable item");
                    stats.parse_failures += 1;
                    continue;
                }
            };

            let mut record = match self.normalizer.normalize(id, raw, collected_at) {
                Ok(record) => record,
                Err(rejection) => {
                    debug!(%rejection, "Rejected item");
                    stats.rejected += 1;
                    continue;
                }
            };

            if policy.translate && !engine.is_duplicate(&record, policy.dedup_by) {
                if let Some(translator) = &self.translator {
                    if translate_title(translator, &mut record).await.is_err() {
                        stats.enrichment_failures += 1;
                    }
                }
            }

            match engine.admit(&record, &policy.relevance, policy.dedup_by, policy.cap, stats.kept) {
                Verdict::Kept => {
                    stats.kept += 1;
                    staged.push(record);
                }
                Verdict::Duplicate => stats.duplicates += 1,
                Verdict::Irrelevant => stats.irrelevant += 1,
                Verdict::Capped => {
                    stats.capped += 1;
                    debug!(cap = ?policy.cap, "Cap reached; not pulling further items");
                    break;
                }
            }
        }

        info!(
            seen = stats.seen,
            kept = stats.kept,
            duplicates = stats.duplicates,
            irrelevant = stats.irrelevant,
            rejected = stats.rejected,
            parse_failures = stats.parse_failures,
            "Source harvested"
        );
        stats
    }
}
