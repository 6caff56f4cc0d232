//! RSS 2.0, RSS 1.0 (RDF) and Atom feed adapter.
//!
//! Covers government, agency and newspaper feeds. The feed body is fetched
//! once and deserialized with `quick-xml`; items keep their feed order.
//!
//! # Entity scrubbing
//!
//! Many feeds embed HTML named entities (`&nbsp;`, `&rdquo;`, ...) that are
//! not valid XML. They are rewritten to numeric character references before
//! parsing, so the characters survive unchanged.

use crate::config::DetailConfig;
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::models::RawItem;
use crate::scrapers::{ItemStream, SourceAdapter, detail};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// `dc:date`; the deserializer sees the local name.
    #[serde(rename = "date", alias = "dc:date")]
    dc_date: Option<String>,
    description: Option<String>,
    source: Option<String>,
}

/// RSS 1.0 keeps its items beside the channel, not inside it.
#[derive(Debug, Deserialize)]
struct RdfDocument {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug)]
pub struct RssAdapter {
    source_id: String,
    url: String,
    detail: Option<DetailConfig>,
}

impl RssAdapter {
    pub fn new(source_id: String, url: String, detail: Option<DetailConfig>) -> Self {
        Self { source_id, url, detail }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source_id, url = %self.url))]
    async fn fetch(&self, fetcher: &Fetcher) -> Result<ItemStream, HarvestError> {
        let body = fetcher.get_text(&self.source_id, &self.url, &[]).await?;
        let items = parse_feed(&self.source_id, &body)?;
        info!(count = items.len(), "Parsed feed");
        Ok(detail::attach(items, fetcher, self.detail.as_ref(), &self.source_id))
    }
}

/// Parse an RSS or Atom document into raw items.
///
/// A document that is neither, or that does not parse, makes the whole source
/// unavailable. An item with neither title nor link is a per-item parse failure.
pub fn parse_feed(
    source_id: &str,
    xml: &str,
) -> Result<Vec<Result<RawItem, HarvestError>>, HarvestError> {
    let xml = scrub_html_entities(xml);

    if xml.contains("<rdf:RDF") {
        let rdf: RdfDocument = from_str(&xml)
            .map_err(|e| HarvestError::unavailable(source_id, format!("malformed RDF: {e}")))?;
        Ok(rss_items(source_id, rdf.items))
    } else if xml.contains("<rss") || xml.contains("<channel") {
        let rss: Rss = from_str(&xml)
            .map_err(|e| HarvestError::unavailable(source_id, format!("malformed RSS: {e}")))?;
        Ok(rss_items(source_id, rss.channel.items))
    } else if xml.contains("<feed") {
        let feed: AtomFeed = from_str(&xml)
            .map_err(|e| HarvestError::unavailable(source_id, format!("malformed Atom: {e}")))?;
        Ok(feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = pick_atom_link(&entry.links);
                if entry.title.is_none() && link.is_none() {
                    return Err(HarvestError::parse(source_id, "Atom entry without title or link"));
                }
                Ok(RawItem {
                    title: entry.title.unwrap_or_default(),
                    link,
                    published: entry.published.or(entry.updated),
                    detail_published: None,
                    content: entry.summary,
                    publisher: None,
                })
            })
            .collect())
    } else {
        Err(HarvestError::unavailable(
            source_id,
            format!(
                "payload is neither RSS nor Atom: {}",
                truncate_for_log(xml.trim(), 120)
            ),
        ))
    }
}

fn rss_items(source_id: &str, items: Vec<RssItem>) -> Vec<Result<RawItem, HarvestError>> {
    items
        .into_iter()
        .map(|it| {
            if it.title.is_none() && it.link.is_none() {
                return Err(HarvestError::parse(source_id, "RSS item without title or link"));
            }
            Ok(RawItem {
                title: it.title.unwrap_or_default(),
                link: it.link.map(|l| l.trim().to_string()),
                published: it.pub_date.or(it.dc_date),
                detail_published: None,
                content: it.description,
                publisher: it.source,
            })
        })
        .collect()
}

fn pick_atom_link(links: &[AtomLink]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| l.href.as_deref())
        .map(|h| h.trim().to_string())
}

const HTML_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", "&#160;"),
    ("&ndash;", "&#8211;"),
    ("&mdash;", "&#8212;"),
    ("&lsquo;", "&#8216;"),
    ("&rsquo;", "&#8217;"),
    ("&ldquo;", "&#8220;"),
    ("&rdquo;", "&#8221;"),
    ("&hellip;", "&#8230;"),
    ("&middot;", "&#183;"),
];

fn scrub_html_entities(xml: &str) -> String {
    HTML_ENTITIES
        .iter()
        .fold(xml.to_string(), |acc, (named, numeric)| acc.replace(named, numeric))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Ministry news</title>
    <link>https://example.gov/</link>
    <item>
      <title>Notice on&nbsp;grain reserves</title>
      <link>https://example.gov/2025/05/06/notice.html</link>
      <pubDate>Tue, 06 May 2025 08:00:00 +0800</pubDate>
      <description><![CDATA[<p>Issued 2025-05-06</p>]]></description>
    </item>
    <item>
      <title>关于印发《实施方案》的通知</title>
      <link>https://example.gov/t20250505_2.html</link>
    </item>
    <lastBuildDate>Tue, 06 May 2025 09:00:00 +0800</lastBuildDate>
    <item>
      <description>orphan description</description>
    </item>
    <item>
      <title>Reserve auction results</title>
      <link>https://example.gov/auction.html</link>
      <dc:date>2025-05-06T08:00:00+08:00</dc:date>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Agency updates</title>
  <link href="https://agency.example/" rel="self"/>
  <entry>
    <title>Quarterly statistics released</title>
    <link rel="alternate" href="https://agency.example/stats/q1"/>
    <updated>2025-04-30T10:00:00Z</updated>
    <summary>Numbers for Q1</summary>
  </entry>
  <entry>
    <title>Board meeting minutes</title>
    <link href="https://agency.example/minutes"/>
    <published>2025-04-29T09:00:00Z</published>
  </entry>
</feed>"#;

    #[test]
    fn test_parses_rss_items_in_order() {
        let items = parse_feed("gov", RSS).unwrap();
        assert_eq!(items.len(), 4);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.title, "Notice on\u{a0}grain reserves");
        assert_eq!(first.link.as_deref(), Some("https://example.gov/2025/05/06/notice.html"));
        assert_eq!(first.published.as_deref(), Some("Tue, 06 May 2025 08:00:00 +0800"));
        assert_eq!(first.content.as_deref(), Some("<p>Issued 2025-05-06</p>"));

        let second = items[1].as_ref().unwrap();
        assert_eq!(second.title, "关于印发《实施方案》的通知");
        assert_eq!(second.published, None);

        assert!(matches!(items[2], Err(HarvestError::ParseFailure { .. })));

        let fourth = items[3].as_ref().unwrap();
        assert_eq!(fourth.title, "Reserve auction results");
        assert_eq!(fourth.published.as_deref(), Some("2025-05-06T08:00:00+08:00"));
    }

    #[test]
    fn test_parses_rss_1_0_items_beside_the_channel() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://bureau.example/">
    <title>Bureau releases</title>
  </channel>
  <item rdf:about="https://bureau.example/r/1">
    <title>Monthly price index</title>
    <link>https://bureau.example/r/1</link>
    <dc:date>2025-05-02</dc:date>
  </item>
  <item rdf:about="https://bureau.example/r/2">
    <title>Trade balance</title>
    <link>https://bureau.example/r/2</link>
  </item>
</rdf:RDF>"#;
        let items = parse_feed("bureau", rdf).unwrap();
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.title, "Monthly price index");
        assert_eq!(first.published.as_deref(), Some("2025-05-02"));
        assert_eq!(items[1].as_ref().unwrap().link.as_deref(), Some("https://bureau.example/r/2"));
    }

    #[test]
    fn test_parses_atom_entries() {
        let items = parse_feed("agency", ATOM).unwrap();
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.link.as_deref(), Some("https://agency.example/stats/q1"));
        assert_eq!(first.published.as_deref(), Some("2025-04-30T10:00:00Z"));
        assert_eq!(first.content.as_deref(), Some("Numbers for Q1"));
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.link.as_deref(), Some("https://agency.example/minutes"));
        assert_eq!(second.published.as_deref(), Some("2025-04-29T09:00:00Z"));
    }

    #[test]
    fn test_empty_channel_is_not_an_error() {
        let items = parse_feed("gov", "<rss><channel><title>x</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_non_feed_payload_is_unavailable() {
        let err = parse_feed("gov", "<html><body>Access denied</body></html>").unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_truncated_feed_is_unavailable() {
        let err = parse_feed("gov", "<rss><channel><item><title>cut").unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable { .. }));
    }
}
