//! Optional title translation for sources that publish in another language.
//!
//! # Architecture
//!
//! - [`Translate`]: async translation of one text
//! - [`HttpTranslator`]: LibreTranslate-compatible HTTP backend
//! - [`translate_title`]: fills `title_translated` on one record
//!
//! Translation is attempted once per title. A failure is an
//! [`HarvestError::EnrichmentFailure`]: the record keeps its original title and
//! an empty translation, and the run continues.

use crate::config::TranslateConfig;
use crate::error::HarvestError;
use crate::models::CanonicalRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, instrument, warn};

pub trait Translate {
    async fn translate(&self, text: &str) -> Result<String, HarvestError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Client for a LibreTranslate-style `POST /translate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: Client,
    config: TranslateConfig,
}

impl HttpTranslator {
    pub fn new(client: Client, config: TranslateConfig) -> Self {
        Self { client, config }
    }
}

impl Translate for HttpTranslator {
    #[instrument(level = "debug", skip_all, fields(endpoint = %self.config.endpoint))]
    async fn translate(&self, text: &str) -> Result<String, HarvestError> {
        let t0 = Instant::now();
        let body = TranslateRequest {
            q: text,
            source: &self.config.source_lang,
            target: &self.config.target_lang,
            format: "text",
            api_key: self.config.api_key.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(HarvestError::enrichment)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::enrichment(format!(
                "translation service answered HTTP {status}"
            )));
        }

        let parsed: TranslateResponse = response.json().await.map_err(HarvestError::enrichment)?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "Translated");
        Ok(parsed.translated_text.trim().to_string())
    }
}

/// Translate the record's title in place.
///
/// On failure the record is left untouched and the error returned for the
/// caller to count.
pub async fn translate_title<T: Translate>(
    translator: &T,
    record: &mut CanonicalRecord,
) -> Result<(), HarvestError> {
    match translator.translate(&record.title).await {
        Ok(translated) if !translated.is_empty() => {
            record.title_translated = Some(translated);
            Ok(())
        }
        Ok(_) => {
            warn!(source = %record.source_id, title = %record.title, "Empty translation; keeping original title");
            Err(HarvestError::enrichment("empty translation"))
        }
        Err(e) => {
            warn!(source = %record.source_id, title = %record.title, error = %e, "Translation failed; keeping original title");
            Err(e)
        }
    }
}
