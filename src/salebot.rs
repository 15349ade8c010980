use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Status and decoded body of a Salebot API call
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    /// Parsed JSON, or the raw text when the body is not JSON
    pub body: Value,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn from_text(status: u16, text: String) -> Self {
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Self { status, body }
    }
}

/// The chat platform's REST surface, keyed by API method name
/// (`whatsapp_message`, `whatsapp_callback`, ...).
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn post(&self, method: &str, payload: &Value) -> Result<ApiReply>;

    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<ApiReply>;
}

pub struct SalebotClient {
    client: reqwest::Client,
    base: String,
}

impl SalebotClient {
    /// `base_url` is the API root; the key becomes the next path segment.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/{}", base_url.trim_end_matches('/'), api_key),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    async fn read_reply(response: reqwest::Response, method: &str) -> Result<ApiReply> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read Salebot response for {method}"))?;
        debug!(method, status, "Salebot replied");
        Ok(ApiReply::from_text(status, text))
    }
}

#[async_trait]
impl ChatApi for SalebotClient {
    async fn post(&self, method: &str, payload: &Value) -> Result<ApiReply> {
        debug!(method, "POST to Salebot");

        let response = self
            .client
            .post(self.url(method))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} to Salebot"))?;

        Self::read_reply(response, method).await
    }

    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<ApiReply> {
        debug!(method, "GET from Salebot");

        let response = self
            .client
            .get(self.url(method))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} to Salebot"))?;

        Self::read_reply(response, method).await
    }
}
