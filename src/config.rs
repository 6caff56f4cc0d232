//! Harvest configuration loaded from a YAML file.
//!
//! One file describes the whole run: where the archive lives, how HTTP
//! requests behave, the normalization policy, an optional translation
//! service, and the list of sources. See `harvest.example.yaml` at the
//! repository root for a complete example.

use crate::error::HarvestError;
use scraper::Selector;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Path of the CSV archive.
    pub output: PathBuf,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub translate: Option<TranslateConfig>,
    pub sources: Vec<SourceConfig>,
}

/// Settings shared by every outgoing request of a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout. A request that exceeds it makes the source unavailable.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Fixed pause before every item-level sub-fetch.
    pub delay_ms: u64,
    /// Upper bound of the random jitter added to `delay_ms`.
    pub jitter_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: concat!("Mozilla/5.0 (compatible; feed_harvester/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
            delay_ms: 500,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub min_title_chars: usize,
    pub min_title_tokens: usize,
    pub date_fallback: DateFallback,
    /// Extra trailing annotations to strip from titles (e.g. a site name).
    pub strip_suffixes: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_title_chars: 6,
            min_title_tokens: 1,
            date_fallback: DateFallback::Unknown,
            strip_suffixes: Vec::new(),
        }
    }
}

/// What to record when no date can be found for an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateFallback {
    /// Store the `unknown` sentinel.
    #[default]
    Unknown,
    /// Store the harvest date, flagged with the `harvest-date` origin.
    HarvestDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateConfig {
    pub endpoint: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_source_lang() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: SourceKind,
    /// At most this many new items per run.
    #[serde(default)]
    pub cap: Option<usize>,
    /// Keep only items whose title contains one of these (case-insensitive).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Drop items whose title contains one of these.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub dedup_by: Option<DedupBy>,
    #[serde(default)]
    pub translate: bool,
    #[serde(default)]
    pub detail: Option<DetailConfig>,
}

impl SourceConfig {
    /// Aggregator links are redirects that change between fetches, so Google
    /// News sources dedup on the title unless told otherwise.
    pub fn dedup_by(&self) -> DedupBy {
        self.dedup_by.unwrap_or(match self.kind {
            SourceKind::GoogleNews { .. } => DedupBy::Title,
            _ => DedupBy::Url,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupBy {
    Url,
    Title,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Rss {
        url: String,
    },
    GoogleNews {
        query: String,
        #[serde(default)]
        site: Option<String>,
        /// Recency window understood by Google News, e.g. `1d` or `7d`.
        #[serde(default)]
        when: Option<String>,
        #[serde(default = "default_hl")]
        hl: String,
        #[serde(default = "default_gl")]
        gl: String,
        #[serde(default = "default_ceid")]
        ceid: String,
    },
    Html {
        url: String,
        item: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        link: Option<String>,
        #[serde(default)]
        date: Option<String>,
    },
    JsonApi {
        url: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        /// JSON pointer to the array of items; empty means the document root.
        #[serde(default)]
        items: String,
        #[serde(default = "default_title_field")]
        title_field: String,
        #[serde(default = "default_link_field")]
        link_field: String,
        #[serde(default)]
        date_field: Option<String>,
        #[serde(default)]
        content_field: Option<String>,
    },
}

fn default_hl() -> String {
    "en-US".to_string()
}

fn default_gl() -> String {
    "US".to_string()
}

fn default_ceid() -> String {
    "US:en".to_string()
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_link_field() -> String {
    "url".to_string()
}

/// Per-item fetch of the item's own page to find its publication date.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    /// Selector whose text (or `datetime`/`content` attribute) holds the date.
    pub date_selector: Option<String>,
    /// Fetch even when the listing already carried a parseable date. The
    /// page date then replaces the listing date.
    pub always: bool,
}

impl HarvestConfig {
    /// Read and validate a config file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, HarvestError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HarvestError::config(path, e))?;
        let config = Self::from_yaml(path, &text)?;
        info!(sources = config.sources.len(), output = %config.output.display(), "Loaded harvest configuration");
        Ok(config)
    }

    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, HarvestError> {
        let config: HarvestConfig =
            serde_yaml::from_str(text).map_err(|e| HarvestError::config(path, e))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), HarvestError> {
        if self.sources.is_empty() {
            return Err(HarvestError::config(path, "no sources configured"));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            let id = source.id.trim();
            if id.is_empty() {
                return Err(HarvestError::config(path, "source with empty id"));
            }
            if !ids.insert(id) {
                return Err(HarvestError::config(path, format!("duplicate source id `{id}`")));
            }
            if source.cap == Some(0) {
                return Err(HarvestError::config(path, format!("source `{id}` has cap 0")));
            }

            let mut selectors: Vec<&str> = Vec::new();
            if let SourceKind::Html { item, title, link, date, .. } = &source.kind {
                selectors.push(item.as_str());
                selectors.extend([title, link, date].into_iter().flatten().map(String::as_str));
            }
            if let Some(sel) = source.detail.as_ref().and_then(|d| d.date_selector.as_deref()) {
                selectors.push(sel);
            }
            for sel in selectors {
                if let Err(e) = Selector::parse(sel) {
                    return Err(HarvestError::config(
                        path,
                        format!("source `{id}` has invalid selector `{sel}`: {e}"),
                    ));
                }
            }
        }
        Ok(())
    }
}
