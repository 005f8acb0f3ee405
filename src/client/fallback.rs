//! Single-shot fallback request and backend health check

use super::wire::{QueryContext, ResultPayload};
use super::{ClientError, FallbackRequester};
use crate::config::ClientConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const QUERY_PATH: &str = "/api/query";
const HEALTH_PATH: &str = "/api/health";

/// `POST /api/query` with a bounded client-side timeout
pub struct HttpFallbackRequester {
    client: Client,
    base_url: String,
}

impl HttpFallbackRequester {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.fallback_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Probe `GET /api/health`
    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self
            .client
            .get(format!("{}{HEALTH_PATH}", self.base_url))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_json(status, &body)
    }
}

#[async_trait]
impl FallbackRequester for HttpFallbackRequester {
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError> {
        let response = self
            .client
            .post(format!("{}{QUERY_PATH}", self.base_url))
            .json(&context.fallback_body())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_json(status, &body)
    }
}

/// Backend readiness as reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub agent_ready: bool,
    #[serde(default)]
    pub kb_ready: bool,
    #[serde(default)]
    pub kb_doc_count: u64,
}

fn parse_json<T: for<'de> Deserialize<'de>>(status: u16, body: &str) -> Result<T, ClientError> {
    if !(200..300).contains(&status) {
        return Err(ClientError::status(status, body));
    }
    serde_json::from_str(body).map_err(|e| ClientError::malformed(format!("invalid response: {e}")))
}
