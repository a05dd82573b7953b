//! Search backend client
//!
//! Elasticsearch bulk ingest + Kibana saved-objects, both over HTTPS with
//! basic auth.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ExportConfig;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{failed} of {total} documents rejected")]
    Rejected { failed: usize, total: usize },

    #[error("unreadable response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Network(err.to_string())
    }
}

/// Where predictions end up
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Bulk-load `payload` (already in bulk format) into `index`.
    /// Returns the number of documents the backend accepted.
    async fn bulk(&self, index: &str, payload: String) -> Result<usize, BackendError>;

    /// Create a dashboard view (index pattern) over `title`
    async fn create_view(&self, title: &str, time_field: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl BulkResponse {
    fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|actions| actions.values().next())
                    .map_or(false, |result| result.get("error").is_some())
            })
            .count()
    }
}

pub struct HttpBackend {
    es_url: String,
    kibana_url: String,
    username: String,
    password: String,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &ExportConfig) -> Result<Self, BackendError> {
        if !config.verify_tls {
            log::warn!("TLS certificate verification disabled for the search backend");
        }
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            es_url: config.es_url.trim_end_matches('/').to_string(),
            kibana_url: config.kibana_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http_client,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::Status { status, body })
        }
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn bulk(&self, index: &str, payload: String) -> Result<usize, BackendError> {
        let url = format!("{}/{}/_bulk", self.es_url, index);
        log::debug!("POST {} ({} bytes)", url, payload.len());

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let result: BulkResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        let total = result.items.len();
        if result.errors {
            return Err(BackendError::Rejected {
                failed: result.failed(),
                total,
            });
        }
        Ok(total)
    }

    async fn create_view(&self, title: &str, time_field: &str) -> Result<(), BackendError> {
        let url = format!("{}/api/saved_objects/index-pattern", self.kibana_url);
        let body = serde_json::json!({
            "attributes": {
                "title": title,
                "timeFieldName": time_field,
            }
        });

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("kbn-xsrf", "true")
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
