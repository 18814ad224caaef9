//! Thin JSON-over-HTTP client shared by the REST adapters (Tron, Bitcoin,
//! BioForest).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::core::errors::WalletError;
use crate::security::redaction::redact_body;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Response whose status the caller wants to inspect itself.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    client: Client,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self, WalletError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        reqwest::Url::parse(trimmed)
            .map_err(|e| WalletError::ConfigError(format!("Invalid API URL '{}': {}", trimmed, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalletError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { base_url: trimmed.to_string(), client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, WalletError> {
        let raw = self.get_raw(path).await?;
        Self::decode(path, raw)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, WalletError> {
        let raw = self.post_raw(path, body).await?;
        Self::decode(path, raw)
    }

    pub async fn get_raw(&self, path: &str) -> Result<RawResponse, WalletError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::read(path, response).await
    }

    pub async fn post_raw<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RawResponse, WalletError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read(path, response).await
    }

    /// POSTs a plain-text body, as Esplora's `/tx` expects.
    pub async fn post_text(&self, path: &str, body: String) -> Result<RawResponse, WalletError> {
        let response = self
            .client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;
        Self::read(path, response).await
    }

    async fn read(path: &str, response: reqwest::Response) -> Result<RawResponse, WalletError> {
        let status = response.status();
        let body = response.text().await?;
        debug!(path, status = status.as_u16(), body = %redact_body(&body), "HTTP response");
        Ok(RawResponse { status, body })
    }

    fn decode<T: DeserializeOwned>(path: &str, raw: RawResponse) -> Result<T, WalletError> {
        if !raw.status.is_success() {
            return Err(WalletError::NetworkError(format!(
                "{} returned {}: {}",
                path,
                raw.status.as_u16(),
                raw.body.trim()
            )));
        }
        serde_json::from_str(&raw.body)
            .map_err(|e| WalletError::NetworkError(format!("Failed to parse {} response: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(RestClient::new("not a url"), Err(WalletError::ConfigError(_))));
        let client = RestClient::new("https://api.example.com/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.url("/x"), "https://api.example.com/x");
    }

    #[tokio::test]
    async fn test_get_json_and_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).json_body(json!({"a": 1}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("not found");
        });

        let client = RestClient::new(&server.base_url()).unwrap();
        let v: Value = client.get_json("/ok").await.unwrap();
        assert_eq!(v["a"], 1);

        let err = client.get_json::<Value>("/missing").await.unwrap_err();
        assert!(matches!(err, WalletError::NetworkError(msg) if msg.contains("404")));
    }
}
