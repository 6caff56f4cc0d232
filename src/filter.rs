//! Deduplication and relevance filtering.
//!
//! A [`FilterEngine`] lives for one run. It checks every candidate record
//! against the [`HistoryIndex`] loaded from the archive and against the keys
//! already accepted earlier in the same run, then applies the caller's
//! relevance predicate and the per-source cap. Records are admitted one at a
//! time in source order, so a caller can stop pulling from an adapter as soon
//! as the cap is reached.

use crate::config::{DedupBy, SourceConfig};
use crate::models::{CanonicalRecord, DedupKey};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Identity keys of everything already in the archive.
///
/// Rebuilt from the sink at the start of every run and never written back.
#[derive(Debug, Default, Clone)]
pub struct HistoryIndex {
    keys: HashSet<DedupKey>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DedupKey) {
        self.keys.insert(key);
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<DedupKey> for HistoryIndex {
    fn from_iter<I: IntoIterator<Item = DedupKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Caller-supplied relevance test.
pub trait Relevance {
    fn is_relevant(&self, record: &CanonicalRecord) -> bool;
}

impl<F> Relevance for F
where
    F: Fn(&CanonicalRecord) -> bool,
{
    fn is_relevant(&self, record: &CanonicalRecord) -> bool {
        self(record)
    }
}

/// Keyword match on the title (and translated title, when present).
///
/// With no include keywords every record passes unless it hits an exclude
/// keyword. Matching is case-insensitive substring matching, which also works
/// for scripts without word boundaries.
#[derive(Debug, Clone, Default)]
pub struct KeywordRelevance {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl KeywordRelevance {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let fold = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            include: fold(include),
            exclude: fold(exclude),
        }
    }
}

impl Relevance for KeywordRelevance {
    fn is_relevant(&self, record: &CanonicalRecord) -> bool {
        let haystack = match &record.title_translated {
            Some(t) => format!("{} {}", record.title, t).to_lowercase(),
            None => record.title.to_lowercase(),
        };
        let included =
            self.include.is_empty() || self.include.iter().any(|k| haystack.contains(k));
        included && !self.exclude.iter().any(|k| haystack.contains(k))
    }
}

/// What the engine does with records of one source.
#[derive(Debug, Clone)]
pub struct SourcePolicy {
    pub relevance: KeywordRelevance,
    pub cap: Option<usize>,
    pub dedup_by: DedupBy,
    pub translate: bool,
}

impl SourcePolicy {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            relevance: KeywordRelevance::new(&source.keywords, &source.exclude),
            cap: source.cap,
            dedup_by: source.dedup_by(),
            translate: source.translate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Kept,
    Duplicate,
    Irrelevant,
    /// The source already reached its cap this run.
    Capped,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub kept: Vec<CanonicalRecord>,
    pub duplicates: usize,
    pub irrelevant: usize,
    pub capped: usize,
}

/// Per-run filter state over a borrowed history.
#[derive(Debug)]
pub struct FilterEngine<'h> {
    history: &'h HistoryIndex,
    seen: HashSet<DedupKey>,
}

impl<'h> FilterEngine<'h> {
    pub fn new(history: &'h HistoryIndex) -> Self {
        Self {
            history,
            seen: HashSet::new(),
        }
    }

    /// Already archived, or already admitted earlier in this run.
    pub fn is_duplicate(&self, record: &CanonicalRecord, dedup_by: DedupBy) -> bool {
        let key = record.dedup_key(dedup_by);
        self.history.contains(&key) || self.seen.contains(&key)
    }

    /// Decide on one record. `kept_so_far` is the number of records this
    /// source already had admitted.
    pub fn admit(
        &mut self,
        record: &CanonicalRecord,
        relevance: &dyn Relevance,
        dedup_by: DedupBy,
        cap: Option<usize>,
        kept_so_far: usize,
    ) -> Verdict {
        if self.is_duplicate(record, dedup_by) {
            return Verdict::Duplicate;
        }
        if !relevance.is_relevant(record) {
            return Verdict::Irrelevant;
        }
        if cap.is_some_and(|cap| kept_so_far >= cap) {
            return Verdict::Capped;
        }
        self.seen.insert(record.dedup_key(dedup_by));
        Verdict::Kept
    }

    /// Filter a whole batch of one source, preserving its order.
    pub fn filter(
        &mut self,
        records: Vec<CanonicalRecord>,
        relevance: &dyn Relevance,
        dedup_by: DedupBy,
        cap: Option<usize>,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for record in records {
            match self.admit(&record, relevance, dedup_by, cap, outcome.kept.len()) {
                Verdict::Kept => outcome.kept.push(record),
                Verdict::Duplicate => outcome.duplicates += 1,
                Verdict::Irrelevant => outcome.irrelevant += 1,
                Verdict::Capped => outcome.capped += 1,
            }
        }
        outcome
    }
}

/// Archive order: newest published date first, unknown dates last, ties by
/// source id. The sort is stable, so records of one source with the same date
/// keep the order the source listed them in.
pub fn merge_order(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    records
        .into_iter()
        .sorted_by(|a, b| {
            let by_date = match (a.published_date.date(), b.published_date.date()) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_date.then_with(|| a.source_id.cmp(&b.source_id))
        })
        .collect()
}
