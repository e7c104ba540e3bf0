//! Shared plumbing for the Cloudflare REST API.
//!
//! Both the Workers AI embedding adapter and the Vectorize adapter talk to
//! `https://api.cloudflare.com/client/v4` with a bearer token and receive
//! the same response envelope:
//!
//! ```json
//! { "success": true, "errors": [], "messages": [], "result": { ... } }
//! ```
//!
//! [`CloudflareClient::decode`] turns that envelope into either the typed
//! `result` or a classified [`ProviderError`].

use anyhow::{anyhow, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CloudflareConfig;
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Authenticated HTTP client scoped to one Cloudflare account.
#[derive(Clone)]
pub struct CloudflareClient {
    http: reqwest::Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

impl CloudflareClient {
    /// Build a client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API token was not resolved (see
    /// [`load_config`](crate::config::load_config)) or the HTTP client
    /// cannot be built.
    pub fn new(config: &CloudflareConfig, timeout: Duration) -> Result<Self> {
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_token_env))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            api_token,
        })
    }

    /// `{api_base}/{path}`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// `{api_base}/accounts/{account_id}/{path}`
    pub fn account_url(&self, path: &str) -> String {
        self.url(&format!(
            "accounts/{}/{}",
            self.account_id,
            path.trim_start_matches('/')
        ))
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.api_token)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.api_token)
    }

    /// Send a request and return the raw status and body.
    pub async fn fetch(&self, req: RequestBuilder) -> Result<(StatusCode, String), ProviderError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok((status, body))
    }

    /// Send a request and decode the envelope's `result`.
    pub async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ProviderError> {
        let (status, body) = self.fetch(req).await?;
        Self::decode(status, &body)
    }

    /// Classify a raw response.
    ///
    /// - non-2xx → [`ProviderError::from_status`]
    /// - unparsable body, `success: false`, or missing `result` → permanent
    pub fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ProviderError> {
        if !status.is_success() {
            return Err(ProviderError::from_status(status, body));
        }
        let envelope: Envelope<T> = serde_json::from_str(body)
            .map_err(|e| ProviderError::Permanent(format!("malformed response: {}", e)))?;
        if !envelope.success {
            let detail = envelope
                .errors
                .iter()
                .map(|m| format!("[{}] {}", m.code, m.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProviderError::Permanent(format!(
                "request reported failure: {}",
                if detail.is_empty() { "unknown error" } else { detail.as_str() }
            )));
        }
        envelope
            .result
            .ok_or_else(|| ProviderError::Permanent("malformed response: missing result".into()))
    }
}
