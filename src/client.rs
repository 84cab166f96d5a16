//! Command-line RPC client
//!
//! Talks to an embedded server (or a relay) over HTTP.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::mcp::types::{JsonRpcMessage, RequestId};

/// HTTP client for a bridge endpoint
pub struct BridgeClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// Base URL, e.g. `http://127.0.0.1:4123`
    base_url: String,

    /// Bearer token sent with every request
    auth_token: Option<String>,

    next_id: AtomicI64,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            next_id: AtomicI64::new(1),
        }
    }

    fn rpc_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send one request envelope and return the reply envelope
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcMessage::request(id, method, params);
        debug!(method, url = %self.rpc_url(), "Sending request");

        let response = self
            .authorize(self.http_client.post(self.rpc_url()))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(%status, "Received reply");
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// `GET /tools`
    pub async fn tools(&self) -> Result<Value> {
        let response = self
            .authorize(self.http_client.get(format!("{}/tools", self.base_url)))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// `tools/list` over RPC
    pub async fn list(&self) -> Result<Value> {
        self.call("tools/list", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = BridgeClient::new("http://127.0.0.1:4123/", None);
        assert_eq!(client.rpc_url(), "http://127.0.0.1:4123/mcp");
    }
}
