//! Source adapters turning remote resources into [`RawItem`]s.
//!
//! Every adapter implements [`SourceAdapter`]. One call to
//! [`SourceAdapter::fetch`] makes a single request for the listing resource
//! and returns a lazy stream of items; no cursor survives between runs.
//!
//! # Supported Sources
//!
//! | Kind | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | `rss` | [`rss`] | RSS 2.0 / Atom | Government and agency feeds |
//! | `google_news` | [`google_news`] | Google News RSS search | Keyword + optional site filter |
//! | `html` | [`html`] | HTML scraping | CSS selectors from config |
//! | `json_api` | [`json_api`] | REST API | JSON pointer + field names from config |
//!
//! Any of them can add a per-item [`detail`] fetch to find the publication
//! date on the item's own page. Detail fetches happen while the stream is
//! polled, each after a bounded pause.
//!
//! # Failure
//!
//! - The listing request fails or its payload is unreadable: `fetch` returns
//!   [`HarvestError::SourceUnavailable`].
//! - One item is malformed: the stream yields [`HarvestError::ParseFailure`]
//!   for it and carries on.

pub mod detail;
pub mod google_news;
pub mod html;
pub mod json_api;
pub mod rss;

use crate::config::{SourceConfig, SourceKind};
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::models::RawItem;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

pub type ItemStream = BoxStream<'static, Result<RawItem, HarvestError>>;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(&self, fetcher: &Fetcher) -> Result<ItemStream, HarvestError>;
}

/// Build the adapter described by one `sources` entry.
pub fn build_adapter(source: &SourceConfig) -> Box<dyn SourceAdapter> {
    let id = source.id.clone();
    let detail = source.detail.clone();
    match &source.kind {
        SourceKind::Rss { url } => Box::new(rss::RssAdapter::new(id, url.clone(), detail)),
        SourceKind::GoogleNews { query, site, when, hl, gl, ceid } => {
            Box::new(google_news::GoogleNewsAdapter {
                source_id: id,
                query: query.clone(),
                site: site.clone(),
                when: when.clone(),
                hl: hl.clone(),
                gl: gl.clone(),
                ceid: ceid.clone(),
                detail,
            })
        }
        SourceKind::Html { url, item, title, link, date } => Box::new(html::HtmlAdapter {
            source_id: id,
            url: url.clone(),
            selectors: html::ListingSelectors {
                item: item.clone(),
                title: title.clone(),
                link: link.clone(),
                date: date.clone(),
            },
            detail,
        }),
        SourceKind::JsonApi {
            url,
            params,
            items,
            title_field,
            link_field,
            date_field,
            content_field,
        } => Box::new(json_api::JsonApiAdapter {
            source_id: id,
            url: url.clone(),
            params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            fields: json_api::ItemFields {
                items: items.clone(),
                title: title_field.clone(),
                link: link_field.clone(),
                date: date_field.clone(),
                content: content_field.clone(),
            },
            detail,
        }),
    }
}

/// Turn already-parsed items into a stream.
pub(crate) fn into_stream(items: Vec<Result<RawItem, HarvestError>>) -> ItemStream {
    stream::iter(items).boxed()
}
