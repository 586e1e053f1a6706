//! HTTP client for the ingest collector
//!
//! Batches are POSTed to `{endpoint}/ingest` as `{"events": [...]}`. Any 2xx
//! response counts as delivered; everything else is a delivery failure and the
//! batch stays queued.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::types::Event;

/// Response from POST /ingest
///
/// Every field is optional on the wire; a bare 2xx with an empty body is
/// still a successful delivery.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub ok: bool,
    /// Number of events accepted
    #[serde(default)]
    pub accepted: usize,
    /// Number of events rejected by validation
    #[serde(default)]
    pub rejected: usize,
    /// First few rejection reasons
    #[serde(default)]
    pub errors: Vec<IngestRejection>,
}

/// One rejected event as reported by the collector
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRejection {
    pub index: usize,
    pub error: String,
}

/// Ships one batch to the remote collector
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, events: &[Event]) -> Result<IngestResponse>;
}

/// HTTP transport for the ingest collector
pub struct CollectorClient {
    config: CollectorConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl CollectorClient {
    /// Create a new collector client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.endpoint.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// Send one batch of events
    pub async fn send_events(&self, events: &[Event]) -> Result<IngestResponse> {
        let url = format!("{}/ingest", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&IngestRequest { events })
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| Error::Delivery(format!("failed to read response: {}", e)))?;
            // The batch is delivered once we see 2xx; an unreadable body only
            // costs us the stats.
            let parsed = serde_json::from_str(&body).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Unparseable ingest response body");
                IngestResponse {
                    ok: true,
                    accepted: events.len(),
                    ..Default::default()
                }
            });
            Ok(parsed)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }

    /// Check if the collector is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get the configured batch size
    pub fn batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Get the configured flush interval
    pub fn flush_interval(&self) -> Duration {
        self.config.flush_interval()
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for CollectorClient {
    async fn deliver(&self, events: &[Event]) -> Result<IngestResponse> {
        self.send_events(events).await
    }
}

/// Request body for POST /ingest
#[derive(Serialize)]
struct IngestRequest<'a> {
    events: &'a [Event],
}
