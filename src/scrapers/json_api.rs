//! REST/JSON API adapter.
//!
//! One GET with the configured query parameters. The item array is located
//! with a JSON pointer (`items`, empty for the document root). Field names
//! are either plain keys or, when they start with `/`, pointers relative to
//! the item. Numeric dates are passed on as text and read as unix time
//! during normalization.

use crate::config::DetailConfig;
use crate::error::HarvestError;
use crate::fetch::Fetcher;
use crate::models::RawItem;
use crate::scrapers::{ItemStream, SourceAdapter, detail};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct ItemFields {
    pub items: String,
    pub title: String,
    pub link: String,
    pub date: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JsonApiAdapter {
    pub source_id: String,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub fields: ItemFields,
    pub detail: Option<DetailConfig>,
}

#[async_trait]
impl SourceAdapter for JsonApiAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source_id, url = %self.url))]
    async fn fetch(&self, fetcher: &Fetcher) -> Result<ItemStream, HarvestError> {
        let body = fetcher.get_text(&self.source_id, &self.url, &self.params).await?;
        let base = Url::parse(&self.url).ok();
        let items = parse_items(&self.source_id, &body, &self.fields, base.as_ref())?;
        info!(count = items.len(), "Parsed API response");
        Ok(detail::attach(items, fetcher, self.detail.as_ref(), &self.source_id))
    }
}

/// Extract items from an API response body.
pub fn parse_items(
    source_id: &str,
    body: &str,
    fields: &ItemFields,
    base: Option<&Url>,
) -> Result<Vec<Result<RawItem, HarvestError>>, HarvestError> {
    let doc: Value = serde_json::from_str(body)
        .map_err(|e| {
            HarvestError::unavailable(
                source_id,
                format!("malformed JSON ({e}): {}", truncate_for_log(body.trim(), 120)),
            )
        })?;

    let pointer = match fields.items.as_str() {
        "" => String::new(),
        p if p.starts_with('/') => p.to_string(),
        p => format!("/{p}"),
    };
    let array = doc
        .pointer(&pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HarvestError::unavailable(source_id, format!("no item array at `{}`", fields.items))
        })?;

    Ok(array
        .iter()
        .enumerate()
        .map(|(i, item)| item_from_value(source_id, i, item, fields, base))
        .collect())
}

fn item_from_value(
    source_id: &str,
    index: usize,
    item: &Value,
    fields: &ItemFields,
    base: Option<&Url>,
) -> Result<RawItem, HarvestError> {
    let title = lookup(item, &fields.title)
        .and_then(as_text)
        .ok_or_else(|| {
            HarvestError::parse(source_id, format!("item {index} has no `{}`", fields.title))
        })?;

    let link = lookup(item, &fields.link).and_then(as_text).map(|href| {
        match base.and_then(|b| b.join(href.trim()).ok()) {
            Some(resolved) => resolved.to_string(),
            None => href,
        }
    });

    let text_field = |name: &Option<String>| {
        name.as_deref()
            .and_then(|n| lookup(item, n))
            .and_then(as_text)
    };

    Ok(RawItem {
        title,
        link,
        published: text_field(&fields.date),
        detail_published: None,
        content: text_field(&fields.content),
        publisher: None,
    })
}

fn lookup<'a>(item: &'a Value, field: &str) -> Option<&'a Value> {
    if field.starts_with('/') {
        item.pointer(field)
    } else {
        item.get(field)
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(items: &str) -> ItemFields {
        ItemFields {
            items: items.into(),
            title: "title".into(),
            link: "url".into(),
            date: Some("published_at".into()),
            content: Some("/body/summary".into()),
        }
    }

    #[test]
    fn test_items_under_pointer() {
        let body = r#"{"data":{"items":[
            {"title":"Energy outlook","url":"/articles/1","published_at":"2025-05-06T09:00:00Z","body":{"summary":"Gas prices"}},
            {"title":"Grid upgrade","url":"https://api.example.org/articles/2","published_at":1746403200}
        ]}}"#;
        let base = Url::parse("https://api.example.org/v1/search").unwrap();
        let items = parse_items("api", body, &fields("/data/items"), Some(&base)).unwrap();
        assert_eq!(items.len(), 2);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.title, "Energy outlook");
        assert_eq!(first.link.as_deref(), Some("https://api.example.org/articles/1"));
        assert_eq!(first.published.as_deref(), Some("2025-05-06T09:00:00Z"));
        assert_eq!(first.content.as_deref(), Some("Gas prices"));

        let second = items[1].as_ref().unwrap();
        assert_eq!(second.published.as_deref(), Some("1746403200"));
        assert_eq!(second.content, None);
    }

    #[test]
    fn test_root_array_and_pointer_without_slash() {
        let body = r#"[{"title":"A","url":"https://x.example/a"}]"#;
        assert_eq!(parse_items("api", body, &fields(""), None).unwrap().len(), 1);

        let body = r#"{"results":[{"title":"B","url":"https://x.example/b"}]}"#;
        assert_eq!(parse_items("api", body, &fields("results"), None).unwrap().len(), 1);
    }

    #[test]
    fn test_item_without_title_is_parse_failure() {
        let body = r#"[{"headline":"wrong key","url":"https://x.example/a"},{"title":"ok"}]"#;
        let items = parse_items("api", body, &fields(""), None).unwrap();
        assert!(matches!(items[0], Err(HarvestError::ParseFailure { .. })));
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.title, "ok");
        assert_eq!(second.link, None);
    }

    #[test]
    fn test_missing_array_is_unavailable() {
        let err = parse_items("api", r#"{"error":"rate limited"}"#, &fields("/data"), None).unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable { .. }));
        let err = parse_items("api", "<html>", &fields(""), None).unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable { .. }));
    }
}
