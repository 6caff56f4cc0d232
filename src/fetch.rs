//! HTTP access shared by every adapter of a run.
//!
//! A [`Fetcher`] owns one `reqwest::Client` configured with the run's timeout
//! and user agent. It makes exactly one attempt per call: any transport
//! error, timeout or non-success status becomes
//! [`HarvestError::SourceUnavailable`], and retrying is left to the next run.

use crate::config::HttpConfig;
use crate::error::HarvestError;
use rand::{Rng, rng};
use reqwest::Client;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    delay: Duration,
    jitter_ms: u64,
}

impl Fetcher {
    pub fn new(http: &HttpConfig) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::config(PathBuf::from("http"), e))?;
        Ok(Self {
            client,
            delay: Duration::from_millis(http.delay_ms),
            jitter_ms: http.jitter_ms,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the body text.
    #[instrument(level = "debug", skip_all, fields(%source_id, %url))]
    pub async fn get_text(
        &self,
        source_id: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<String, HarvestError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Request failed");
                HarvestError::unavailable(source_id, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Non-success status");
            return Err(HarvestError::unavailable(
                source_id,
                format!("HTTP {status} from {url}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::unavailable(source_id, e))?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(body)
    }

    /// The bounded pause taken before every item-level sub-fetch.
    pub fn pause_duration(&self) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.jitter_ms)
        };
        self.delay + Duration::from_millis(jitter)
    }

    pub async fn pause(&self) {
        let delay = self.pause_duration();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
