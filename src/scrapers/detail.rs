//! Per-item detail fetch: open the item's own page to find its publication date.
//!
//! Applies to any adapter whose source carries a `detail` block. Items are
//! visited lazily as the stream is polled, with a bounded pause before each
//! request. A failed detail fetch is logged and the item passes through with
//! its listing values.

use crate::config::DetailConfig;
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::models::RawItem;
use crate::normalize::parse_structured_date;
use crate::scrapers::{ItemStream, into_stream};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

/// Meta tags that commonly carry the publication timestamp, in lookup order.
const DATE_META: &[&str] = &[
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="pubdate"]"#,
    r#"meta[name="PubDate"]"#,
    r#"meta[name="publishdate"]"#,
    r#"meta[name="firstpublishedtime"]"#,
    r#"meta[itemprop="datePublished"]"#,
    r#"meta[property="og:published_time"]"#,
    r#"meta[name="dc.date"]"#,
    r#"meta[name="date"]"#,
];

/// Wrap parsed listing items in a stream that runs the detail fetch.
///
/// Without a `detail` block the items are streamed unchanged.
pub fn attach(
    items: Vec<Result<RawItem, HarvestError>>,
    fetcher: &Fetcher,
    detail: Option<&DetailConfig>,
    source_id: &str,
) -> ItemStream {
    let Some(detail) = detail.cloned() else {
        return into_stream(items);
    };
    let fetcher = fetcher.clone();
    let source_id = source_id.to_string();

    stream::iter(items)
        .then(move |item| {
            let fetcher = fetcher.clone();
            let detail = detail.clone();
            let source_id = source_id.clone();
            async move {
                let mut raw = item?;
                if !needs_detail(&raw, &detail) {
                    return Ok(raw);
                }
                let Some(link) = raw.link.clone() else {
                    return Ok(raw);
                };

                fetcher.pause().await;
                match fetch_published(&fetcher, &source_id, &link, detail.date_selector.as_deref())
                    .await
                {
                    Ok(Some(found)) => {
                        debug!(%source_id, %link, published = %found, "Detail page date");
                        raw.detail_published = Some(found);
                    }
                    Ok(None) => debug!(%source_id, %link, "No date on detail page"),
                    Err(e) => {
                        warn!(%source_id, %link, error = %e, "Detail fetch failed; keeping listing values")
                    }
                }
                Ok::<RawItem, HarvestError>(raw)
            }
        })
        .boxed()
}

fn needs_detail(raw: &RawItem, detail: &DetailConfig) -> bool {
    detail.always
        || raw
            .published
            .as_deref()
            .and_then(parse_structured_date)
            .is_none()
}

async fn fetch_published(
    fetcher: &Fetcher,
    source_id: &str,
    link: &str,
    selector: Option<&str>,
) -> Result<Option<String>, HarvestError> {
    let html = fetcher
        .get_text(source_id, link, &[])
        .await
        .map_err(HarvestError::enrichment)?;
    Ok(extract_published(&html, selector))
}

/// Find a publication timestamp in a detail page.
///
/// Lookup order: the configured selector, well-known meta tags, JSON-LD
/// `datePublished`, then the first `time[datetime]`.
pub fn extract_published(html: &str, selector: Option<&str>) -> Option<String> {
    let document = Html::parse_document(html);

    if let Some(sel) = selector.and_then(|s| Selector::parse(s).ok()) {
        let found = document.select(&sel).find_map(|el| {
            let value = el
                .value()
                .attr("datetime")
                .or_else(|| el.value().attr("content"))
                .map(str::to_string)
                .unwrap_or_else(|| el.text().collect::<Vec<_>>().join(" "));
            non_empty(value)
        });
        if found.is_some() {
            return found;
        }
    }

    for meta in DATE_META {
        let Ok(sel) = Selector::parse(meta) else { continue };
        if let Some(found) = document
            .select(&sel)
            .find_map(|el| el.value().attr("content").and_then(|c| non_empty(c.to_string())))
        {
            return Some(found);
        }
    }

    if let Ok(sel) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        for script in document.select(&sel) {
            let text = script.text().collect::<String>();
            let found = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| find_date_published(&value));
            if found.is_some() {
                return found;
            }
        }
    }

    let sel = Selector::parse("time[datetime]").ok()?;
    document
        .select(&sel)
        .find_map(|el| el.value().attr("datetime").and_then(|d| non_empty(d.to_string())))
}

fn find_date_published(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("datePublished")
            .and_then(Value::as_str)
            .and_then(|s| non_empty(s.to_string()))
            .or_else(|| map.values().find_map(find_date_published)),
        Value::Array(items) => items.iter().find_map(find_date_published),
        _ => None,
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
