//! Transport for remote plugin calls.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::error::{NetworkError, NetworkResult};

/// Media type of the plugin protocol.
pub const PLUGIN_MEDIA_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Issues synchronous request/response calls to a plugin.
#[async_trait]
pub trait PluginClient: Send + Sync {
    /// Call `method` with a JSON request and return the JSON reply.
    /// Replies without a body come back as `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin cannot be reached or reports an error.
    async fn call(&self, method: &str, request: Value) -> NetworkResult<Value>;
}

/// Plugin client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPluginClient {
    client: Client,
    base_url: String,
}

impl HttpPluginClient {
    /// Create a client for the plugin at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The plugin's base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

/// Extract the `Err` string of a plugin reply.
fn plugin_error(value: &Value) -> Option<String> {
    value
        .get("Err")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl PluginClient for HttpPluginClient {
    async fn call(&self, method: &str, request: Value) -> NetworkResult<Value> {
        let url = self.url(method);
        tracing::debug!(url = %url, "Calling plugin");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, PLUGIN_MEDIA_TYPE)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let reply = if body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&body) {
                Ok(reply) => reply,
                // Error pages are reported with the status below.
                Err(_) if !status.is_success() => Value::Null,
                Err(source) => {
                    return Err(NetworkError::Decode {
                        method: method.to_string(),
                        source,
                    });
                }
            }
        };

        if let Some(message) = plugin_error(&reply) {
            return Err(NetworkError::Plugin {
                method: method.to_string(),
                message,
            });
        }

        if !status.is_success() {
            return Err(NetworkError::Plugin {
                method: method.to_string(),
                message: format!("{status}: {}", body.trim()),
            });
        }

        Ok(reply)
    }
}
