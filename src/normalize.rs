//! Mapping of raw source items to canonical records.
//!
//! Normalization is pure: no network, no clock (the harvest timestamp is
//! passed in), and the same [`RawItem`] always yields the same record.
//!
//! # Date resolution
//!
//! Candidates are tried in a fixed order and the first parseable one wins:
//!
//! 1. the date found on the item's page by a detail fetch
//! 2. the structured timestamp from the feed or listing
//! 3. a date written in the item's content text
//! 4. a date embedded in the url path
//!
//! A detail date only exists when the source asked for one: either the
//! listing had no usable date, or the source sets `detail.always` to check
//! listing dates against the article page.
//!
//! When none parses the record gets [`PublishedDate::Unknown`], or the harvest
//! date flagged as [`PublishedDate::Assumed`] if the config opts into that.

use crate::config::{DateFallback, NormalizeConfig};
use crate::models::{CanonicalRecord, DateOrigin, PublishedDate, RawItem};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::fmt;
use url::Url;

/// Why an item was dropped by normalization. Policy, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    EmptyTitle,
    TitleTooShort { chars: usize, tokens: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyTitle => f.write_str("empty title"),
            Rejection::TitleTooShort { chars, tokens } => {
                write!(f, "title too short ({chars} chars, {tokens} tokens)")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    min_title_chars: usize,
    min_title_tokens: usize,
    date_fallback: DateFallback,
    strip_suffixes: Vec<String>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            min_title_chars: config.min_title_chars,
            min_title_tokens: config.min_title_tokens,
            date_fallback: config.date_fallback,
            strip_suffixes: config.strip_suffixes.clone(),
        }
    }

    pub fn normalize(
        &self,
        source_id: &str,
        raw: RawItem,
        collected_at: DateTime<Utc>,
    ) -> Result<CanonicalRecord, Rejection> {
        let title = clean_title(&raw.title, raw.publisher.as_deref(), &self.strip_suffixes);
        self.check_title(&title)?;

        let url = raw.link.as_deref().and_then(clean_url);
        let published_date = self.resolve_date(&raw, collected_at.date_naive());

        Ok(CanonicalRecord {
            source_id: source_id.to_string(),
            published_date,
            title,
            url,
            collected_at,
            title_translated: None,
        })
    }

    fn check_title(&self, title: &str) -> Result<(), Rejection> {
        let chars = title.chars().count();
        if chars == 0 {
            return Err(Rejection::EmptyTitle);
        }
        let tokens = title.split_whitespace().count();
        if chars < self.min_title_chars || tokens < self.min_title_tokens {
            return Err(Rejection::TitleTooShort { chars, tokens });
        }
        Ok(())
    }

    pub fn resolve_date(&self, raw: &RawItem, harvest_date: NaiveDate) -> PublishedDate {
        let known = |date, origin| PublishedDate::Known { date, origin };

        if let Some(date) = raw.detail_published.as_deref().and_then(parse_structured_date) {
            return known(date, DateOrigin::Detail);
        }
        if let Some(date) = raw.published.as_deref().and_then(parse_structured_date) {
            return known(date, DateOrigin::Feed);
        }
        if let Some(date) = raw
            .content
            .as_deref()
            .and_then(|c| find_date_in_text(&strip_markup(c)))
        {
            return known(date, DateOrigin::Content);
        }
        if let Some(date) = raw.link.as_deref().and_then(find_date_in_url) {
            return known(date, DateOrigin::Url);
        }

        match self.date_fallback {
            DateFallback::Unknown => PublishedDate::Unknown,
            DateFallback::HarvestDate => PublishedDate::Assumed(harvest_date),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y年%m月%d日",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse a timestamp as published by a feed, listing, or API field.
///
/// RFC 2822 and RFC 3339 keep the publisher's own calendar day (no conversion
/// to UTC). Bare integers are read as unix seconds, or milliseconds when
/// 13 digits long. Anything else falls through to [`find_date_in_text`].
pub fn parse_structured_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return parse_unix(s);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    find_date_in_text(s)
}

fn parse_unix(digits: &str) -> Option<NaiveDate> {
    let n: i64 = digits.parse().ok()?;
    let secs = match digits.len() {
        10 => n,
        13 => n / 1000,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

static RE_YMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:19|20)\d{2})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})(?:\D|$)").unwrap()
});
static RE_MDY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+((?:19|20)\d{2})\b",
    )
    .unwrap()
});
static RE_DMY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+((?:19|20)\d{2})\b",
    )
    .unwrap()
});

/// Find the first date written in free text.
///
/// Numeric year-first dates (including `2025年5月6日`) are tried first, then
/// `May 6, 2025`, then `6 May 2025`.
pub fn find_date_in_text(text: &str) -> Option<NaiveDate> {
    for caps in RE_YMD.captures_iter(text) {
        if let Some(d) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(d);
        }
    }
    for caps in RE_MDY.captures_iter(text) {
        if let Some(d) = month_index(&caps[1]).and_then(|m| ymd(&caps[3], &m.to_string(), &caps[2])) {
            return Some(d);
        }
    }
    for caps in RE_DMY.captures_iter(text) {
        if let Some(d) = month_index(&caps[2]).and_then(|m| ymd(&caps[3], &m.to_string(), &caps[1])) {
            return Some(d);
        }
    }
    None
}

static URL_DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // /2025/05/06/slug
        r"/((?:19|20)\d{2})/(\d{1,2})/(\d{1,2})(?:/|$|\D)",
        // /news-2025-05-06.html
        r"((?:19|20)\d{2})-(\d{2})-(\d{2})(?:\D|$)",
        // /202505/06/ and /202505/t20250506_1.html
        r"/((?:19|20)\d{2})(\d{2})/(\d{2})(?:/|$)",
        // /20250506/ and t20250506_123.html
        r"(?:^|[/_t-])((?:19|20)\d{2})(\d{2})(\d{2})(?:[/_.-]|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Find a date in the path of a url.
pub fn find_date_in_url(link: &str) -> Option<NaiveDate> {
    let path = Url::parse(link.trim())
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| link.trim().to_string());
    for re in URL_DATE_PATTERNS.iter() {
        for caps in re.captures_iter(&path) {
            if let Some(d) = ymd(&caps[1], &caps[2], &caps[3]) {
                return Some(d);
            }
        }
    }
    None
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn month_index(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Remove tags and decode entities. Plain text passes through untouched.
pub fn strip_markup(s: &str) -> String {
    if !s.contains('<') && !s.contains('&') {
        return s.to_string();
    }
    let fragment = Html::parse_fragment(s);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

pub fn collapse_whitespace(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

const SUFFIX_SEPARATORS: &[&str] = &[" - ", " | ", " \u{2013} ", " \u{2014} ", "_"];

/// Clean a title: strip markup, collapse whitespace, and drop a trailing
/// publisher annotation such as `" - Reuters"`.
pub fn clean_title(raw: &str, publisher: Option<&str>, extra_suffixes: &[String]) -> String {
    let mut title = collapse_whitespace(&strip_markup(raw));

    let suffixes = publisher
        .into_iter()
        .chain(extra_suffixes.iter().map(String::as_str))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty());

    for suffix in suffixes {
        for sep in SUFFIX_SEPARATORS {
            let tail = format!("{sep}{suffix}");
            if title.len() > tail.len() && title.ends_with(&tail) {
                title.truncate(title.len() - tail.len());
                title = title.trim_end().to_string();
            }
        }
    }
    title
}

/// Canonical form of a link: trimmed, without fragment or `utm_*` parameters.
/// Links that do not parse as absolute urls are kept as trimmed text.
pub fn clean_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let Ok(mut url) = Url::parse(raw) else {
        return Some(raw.to_string());
    };
    url.set_fragment(None);

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.iter().any(|(k, _)| k.starts_with("utm_")) {
        let kept: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(k, _)| !k.starts_with("utm_"))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn normalizer(min_chars: usize, fallback: DateFallback) -> Normalizer {
        Normalizer::new(&NormalizeConfig {
            min_title_chars: min_chars,
            min_title_tokens: 1,
            date_fallback: fallback,
            strip_suffixes: vec!["中国政府网".to_string()],
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 9, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_structured_formats() {
        assert_eq!(parse_structured_date("Tue, 06 May 2025 14:03:00 GMT"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("2025-05-06T23:30:00+08:00"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("2025-05-06 10:00:00"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("2025/5/6"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("2025年05月06日"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("May 6, 2025"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("1746489600"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("1746489600000"), Some(date(2025, 5, 6)));
        assert_eq!(parse_structured_date("发布时间：2025-05-06 10:00"), Some(date(2025, 5, 6)));
    }

    #[test]
    fn test_unparseable_dates() {
        assert_eq!(parse_structured_date(""), None);
        assert_eq!(parse_structured_date("yesterday"), None);
        assert_eq!(parse_structured_date("2025-13-40"), None);
        assert_eq!(parse_structured_date("12345"), None);
    }

    #[test]
    fn test_dates_in_text() {
        assert_eq!(find_date_in_text("Published on March 3rd, 2024 by staff"), Some(date(2024, 3, 3)));
        assert_eq!(find_date_in_text("Updated 14 Feb. 2024"), Some(date(2024, 2, 14)));
        assert_eq!(find_date_in_text("国务院 2025年5月6日 发布"), Some(date(2025, 5, 6)));
        assert_eq!(find_date_in_text("no date here, just 2025 things"), None);
    }

    #[test]
    fn test_dates_in_urls() {
        assert_eq!(find_date_in_url("https://news.example.com/2025/05/06/politics/story"), Some(date(2025, 5, 6)));
        assert_eq!(find_date_in_url("https://www.gov.cn/zhengce/202505/content_7022.htm"), None);
        assert_eq!(
            find_date_in_url("https://www.ndrc.gov.cn/xxgk/zcfb/tz/202505/t20250506_1397.html"),
            Some(date(2025, 5, 6))
        );
        assert_eq!(find_date_in_url("https://example.org/news-2024-12-31.html"), Some(date(2024, 12, 31)));
        assert_eq!(find_date_in_url("https://example.org/article/123456789"), None);
    }

    #[test]
    fn test_date_priority_order() {
        let n = normalizer(1, DateFallback::Unknown);
        let raw = RawItem::new("Headline")
            .with_link("https://example.org/2020/01/01/story")
            .with_content("Posted 2021-02-02")
            .with_published("Thu, 03 Mar 2022 10:00:00 GMT");
        assert_eq!(
            n.resolve_date(&raw, now().date_naive()),
            PublishedDate::Known { date: date(2022, 3, 3), origin: DateOrigin::Feed }
        );

        let raw = RawItem { published: Some("garbage".into()), ..raw };
        assert_eq!(
            n.resolve_date(&raw, now().date_naive()),
            PublishedDate::Known { date: date(2021, 2, 2), origin: DateOrigin::Content }
        );

        let raw = RawItem { detail_published: Some("2023-04-04".into()), ..raw };
        assert_eq!(
            n.resolve_date(&raw, now().date_naive()),
            PublishedDate::Known { date: date(2023, 4, 4), origin: DateOrigin::Detail }
        );

        let raw = RawItem {
            published: Some("2025-01-01".into()),
            ..raw
        };
        assert_eq!(
            n.resolve_date(&raw, now().date_naive()),
            PublishedDate::Known { date: date(2023, 4, 4), origin: DateOrigin::Detail }
        );

        let raw = RawItem { published: Some("garbage".into()), detail_published: None, content: None, ..raw };
        assert_eq!(
            n.resolve_date(&raw, now().date_naive()),
            PublishedDate::Known { date: date(2020, 1, 1), origin: DateOrigin::Url }
        );
    }

    #[test]
    fn test_unparseable_date_becomes_unknown() {
        let raw = RawItem::new("A headline without any date")
            .with_link("https://example.org/story")
            .with_published("sometime last week");
        let rec = normalizer(1, DateFallback::Unknown).normalize("src", raw, now()).unwrap();
        assert_eq!(rec.published_date, PublishedDate::Unknown);
        assert_eq!(rec.date_origin(), "unknown");
    }

    #[test]
    fn test_harvest_date_fallback_is_flagged() {
        let raw = RawItem::new("A headline without any date");
        let rec = normalizer(1, DateFallback::HarvestDate).normalize("src", raw, now()).unwrap();
        assert_eq!(rec.published_date, PublishedDate::Assumed(date(2025, 5, 10)));
        assert_eq!(rec.date_origin(), "harvest-date");
    }

    #[test]
    fn test_title_cleanup() {
        assert_eq!(
            clean_title("  Fed holds <b>rates</b>\n steady - Reuters ", Some("Reuters"), &[]),
            "Fed holds rates steady"
        );
        assert_eq!(clean_title("Markets &amp; policy | AP News", Some("AP News"), &[]), "Markets & policy");
        assert_eq!(
            clean_title("国务院关于印发方案的通知_中国政府网", None, &["中国政府网".to_string()]),
            "国务院关于印发方案的通知"
        );
        // only the trailing annotation is removed
        assert_eq!(clean_title("Reuters - the agency", Some("Reuters"), &[]), "Reuters - the agency");
        // a title that is nothing but the publisher stays as-is
        assert_eq!(clean_title(" - Reuters", Some("Reuters"), &[]), "- Reuters");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let n = normalizer(6, DateFallback::Unknown);
        let raw = RawItem::new("Energy policy update - Agency")
            .with_publisher("Agency")
            .with_link("https://example.org/a?utm_source=rss#top")
            .with_published("2025-05-06");
        let a = n.normalize("src", raw.clone(), now()).unwrap();
        let b = n.normalize("src", raw, now()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.title, "Energy policy update");
        assert_eq!(a.url.as_deref(), Some("https://example.org/a"));
    }

    #[test]
    fn test_short_titles_are_rejected() {
        let n = normalizer(6, DateFallback::Unknown);
        assert_eq!(
            n.normalize("src", RawItem::new("<p> </p>"), now()),
            Err(Rejection::EmptyTitle)
        );
        assert_eq!(
            n.normalize("src", RawItem::new("Hi!"), now()),
            Err(Rejection::TitleTooShort { chars: 3, tokens: 1 })
        );
        assert!(n.normalize("src", RawItem::new("Budget"), now()).is_ok());

        let strict = Normalizer::new(&NormalizeConfig {
            min_title_tokens: 3,
            ..NormalizeConfig::default()
        });
        assert!(matches!(
            strict.normalize("src", RawItem::new("Breaking update"), now()),
            Err(Rejection::TitleTooShort { tokens: 2, .. })
        ));
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(
            clean_url(" https://example.org/a?id=7&utm_medium=feed&utm_source=x "),
            Some("https://example.org/a?id=7".to_string())
        );
        assert_eq!(
            clean_url("https://example.org/a?b=%E4%B8%AD"),
            Some("https://example.org/a?b=%E4%B8%AD".to_string())
        );
        assert_eq!(clean_url("/relative/path"), Some("/relative/path".to_string()));
        assert_eq!(clean_url("   "), None);
    }
}
