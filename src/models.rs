//! Data models flowing through a harvest run.
//!
//! - [`RawItem`]: what an adapter pulled out of a source, untouched
//! - [`CanonicalRecord`]: the normalized, storage-ready record
//! - [`PublishedDate`]: a calendar date with its provenance, or the `unknown` sentinel
//! - [`DedupKey`]: identity of a record for duplicate detection
//! - [`HarvestResult`]: new records of one run plus counters

use crate::config::DedupBy;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// A candidate item as extracted from a source, before normalization.
///
/// Every field is the source's own text. Nothing here has been cleaned or parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub link: Option<String>,
    /// Structured timestamp from the feed or listing (pubDate, published, ...).
    pub published: Option<String>,
    /// Date string found on the item's own page by a detail fetch.
    pub detail_published: Option<String>,
    /// Description or surrounding text, searched for an embedded date.
    pub content: Option<String>,
    /// Publisher name when the source is an aggregator.
    pub publisher: Option<String>,
}

impl RawItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published = Some(published.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }
}

/// Where a publication date was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateOrigin {
    Feed,
    Detail,
    Content,
    Url,
}

impl DateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateOrigin::Feed => "feed",
            DateOrigin::Detail => "detail",
            DateOrigin::Content => "content",
            DateOrigin::Url => "url",
        }
    }
}

/// Publication date of a record.
///
/// `Assumed` is the opt-in harvest-date fallback. It is kept distinct from
/// `Known` so the substitution stays visible in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishedDate {
    Known { date: NaiveDate, origin: DateOrigin },
    Assumed(NaiveDate),
    Unknown,
}

impl PublishedDate {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            PublishedDate::Known { date, .. } | PublishedDate::Assumed(date) => Some(*date),
            PublishedDate::Unknown => None,
        }
    }

    pub fn origin_label(&self) -> &'static str {
        match self {
            PublishedDate::Known { origin, .. } => origin.as_str(),
            PublishedDate::Assumed(_) => "harvest-date",
            PublishedDate::Unknown => Self::UNKNOWN,
        }
    }
}

impl fmt::Display for PublishedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => f.write_str(Self::UNKNOWN),
        }
    }
}

impl Serialize for PublishedDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A normalized record. Written once to the archive and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRecord {
    pub source_id: String,
    pub published_date: PublishedDate,
    pub title: String,
    pub url: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub title_translated: Option<String>,
}

impl CanonicalRecord {
    pub fn date_origin(&self) -> &'static str {
        self.published_date.origin_label()
    }

    /// Identity of this record. Falls back to the title when there is no url.
    pub fn dedup_key(&self, by: DedupBy) -> DedupKey {
        match (&self.url, by) {
            (Some(url), DedupBy::Url) => DedupKey::Url(url.clone()),
            _ => DedupKey::title(&self.source_id, &self.title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Url(String),
    Title { source_id: String, title_key: String },
}

impl DedupKey {
    pub fn title(source_id: &str, title: &str) -> Self {
        DedupKey::Title {
            source_id: source_id.to_string(),
            title_key: title_key(title),
        }
    }
}

/// Case-folded, whitespace-collapsed title used for title-based identity.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Counters for one source in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source_id: String,
    pub available: bool,
    pub seen: usize,
    pub parse_failures: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub irrelevant: usize,
    pub capped: usize,
    pub enrichment_failures: usize,
    pub kept: usize,
}

impl SourceStats {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            available: true,
            ..Self::default()
        }
    }
}

/// Counters summed over every source of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    pub seen: usize,
    pub parse_failures: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub irrelevant: usize,
    pub capped: usize,
    pub enrichment_failures: usize,
    pub sources_ok: usize,
    pub sources_unavailable: usize,
}

impl HarvestStats {
    pub fn absorb(&mut self, source: &SourceStats) {
        self.seen += source.seen;
        self.parse_failures += source.parse_failures;
        self.rejected += source.rejected;
        self.duplicates += source.duplicates;
        self.irrelevant += source.irrelevant;
        self.capped += source.capped;
        self.enrichment_failures += source.enrichment_failures;
        if source.available {
            self.sources_ok += 1;
        } else {
            self.sources_unavailable += 1;
        }
    }
}

/// Outcome of one harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub collected_at: DateTime<Utc>,
    /// New records in archive order (newest first, ties by source id).
    pub records: Vec<CanonicalRecord>,
    pub stats: HarvestStats,
    pub sources: Vec<SourceStats>,
    /// Rows actually written to the archive (0 on a dry run).
    pub committed: usize,
}
