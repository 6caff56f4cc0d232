//! Google News RSS search adapter.
//!
//! Builds a search-feed URL from the configured query, optional `site:` and
//! `when:` operators and locale parameters, then parses the result as RSS.
//! Titles arrive as `"Headline - Publisher"`; the publisher comes from the
//! item's `<source>` element and is stripped during normalization.

use crate::config::DetailConfig;
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::scrapers::{ItemStream, SourceAdapter, detail, rss::parse_feed};
use async_trait::async_trait;
use tracing::{info, instrument};
use urlencoding::encode;

const SEARCH_RSS: &str = "https://news.google.com/rss/search";

#[derive(Debug, Clone)]
pub struct GoogleNewsAdapter {
    pub source_id: String,
    pub query: String,
    pub site: Option<String>,
    pub when: Option<String>,
    pub hl: String,
    pub gl: String,
    pub ceid: String,
    pub detail: Option<DetailConfig>,
}

impl GoogleNewsAdapter {
    pub fn search_url(&self) -> String {
        let mut q = self.query.trim().to_string();
        if let Some(site) = non_blank(self.site.as_deref()) {
            q.push_str(" site:");
            q.push_str(site);
        }
        if let Some(when) = non_blank(self.when.as_deref()) {
            q.push_str(" when:");
            q.push_str(when);
        }
        format!(
            "{SEARCH_RSS}?q={}&hl={}&gl={}&ceid={}",
            encode(&q),
            encode(&self.hl),
            encode(&self.gl),
            encode(&self.ceid)
        )
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
impl SourceAdapter for GoogleNewsAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source_id, query = %self.query))]
    async fn fetch(&self, fetcher: &Fetcher) -> Result<ItemStream, HarvestError> {
        let url = self.search_url();
        let body = fetcher.get_text(&self.source_id, &url, &[]).await?;
        let items = parse_feed(&self.source_id, &body)?;
        info!(count = items.len(), "Parsed search feed");
        Ok(detail::attach(items, fetcher, self.detail.as_ref(), &self.source_id))
    }
}
