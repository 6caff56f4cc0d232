//! Generic HTML listing-page scraper.
//!
//! A listing page is fetched once and each element matching the `item`
//! selector becomes one [`RawItem`]. Inside an item:
//!
//! - title: text of the `title` selector, else the text of the link, else the
//!   whole item's text
//! - link: `href` of the `link` selector (default `a[href]`), resolved against
//!   the listing URL
//! - date: `datetime` attribute or text of the `date` selector
//!
//! The item's full text is kept as content so dates printed next to the
//! headline can still be found during normalization.

use crate::config::DetailConfig;
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::models::RawItem;
use crate::scrapers::{ItemStream, SourceAdapter, detail};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct ListingSelectors {
    pub item: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HtmlAdapter {
    pub source_id: String,
    pub url: String,
    pub selectors: ListingSelectors,
    pub detail: Option<DetailConfig>,
}

#[async_trait]
impl SourceAdapter for HtmlAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source_id, url = %self.url))]
    async fn fetch(&self, fetcher: &Fetcher) -> Result<ItemStream, HarvestError> {
        let base = Url::parse(&self.url).map_err(|e| HarvestError::unavailable(&self.source_id, e))?;
        let html = fetcher.get_text(&self.source_id, &self.url, &[]).await?;
        let items = parse_listing(&self.source_id, &base, &html, &self.selectors)?;
        if items.is_empty() {
            warn!(selector = %self.selectors.item, "Listing matched no items");
        } else {
            info!(count = items.len(), "Indexed listing items");
        }
        Ok(detail::attach(items, fetcher, self.detail.as_ref(), &self.source_id))
    }
}

struct Compiled {
    item: Selector,
    title: Option<Selector>,
    link: Selector,
    date: Option<Selector>,
}

fn compile(source_id: &str, s: &str) -> Result<Selector, HarvestError> {
    Selector::parse(s)
        .map_err(|e| HarvestError::unavailable(source_id, format!("invalid selector `{s}`: {e}")))
}

/// Extract items from a listing page.
pub fn parse_listing(
    source_id: &str,
    base: &Url,
    html: &str,
    selectors: &ListingSelectors,
) -> Result<Vec<Result<RawItem, HarvestError>>, HarvestError> {
    let compiled = Compiled {
        item: compile(source_id, &selectors.item)?,
        title: selectors.title.as_deref().map(|s| compile(source_id, s)).transpose()?,
        link: compile(source_id, selectors.link.as_deref().unwrap_or("a[href]"))?,
        date: selectors.date.as_deref().map(|s| compile(source_id, s)).transpose()?,
    };

    let document = Html::parse_document(html);
    Ok(document
        .select(&compiled.item)
        .map(|el| extract_item(source_id, base, el, &compiled))
        .collect())
}

fn extract_item(
    source_id: &str,
    base: &Url,
    el: ElementRef<'_>,
    sel: &Compiled,
) -> Result<RawItem, HarvestError> {
    let link_el = if el.value().name() == "a" {
        Some(el)
    } else {
        el.select(&sel.link).next()
    };
    let link = link_el
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href.trim()).ok())
        .map(String::from);

    let title = match &sel.title {
        Some(t) => el.select(t).next().map(text_of),
        None => link_el.map(text_of),
    }
    .filter(|t| !t.trim().is_empty())
    .unwrap_or_else(|| text_of(el));

    if title.trim().is_empty() && link.is_none() {
        return Err(HarvestError::parse(source_id, "listing item without title or link"));
    }

    let published = sel.date.as_ref().and_then(|d| el.select(d).next()).map(|d| {
        d.value()
            .attr("datetime")
            .map(str::to_string)
            .unwrap_or_else(|| text_of(d))
    });

    debug!(%title, link = ?link, "Listing item");
    Ok(RawItem {
        title,
        link,
        published,
        detail_published: None,
        content: Some(text_of(el)),
        publisher: None,
    })
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}
