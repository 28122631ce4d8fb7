//! Transport seam: `fetch(url, body) -> bytes`.
//!
//! The resolver never talks HTTP directly. Everything goes through a
//! [`Transport`], so tests script responses and hosts can bring their own
//! client (authentication, sessions and retries live there, not here).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_core::{ConfigError, RemoteConfig, RemoteError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;

/// HTTP method of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A single request to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// JSON body for POST requests.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Raw byte transport to the remote service.
///
/// Implementations report non-2xx answers as [`RemoteError::Status`] and
/// connection problems or timeouts as [`RemoteError::Transport`]. They do not
/// retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, RemoteError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, RemoteError> {
        (**self).fetch(request).await
    }
}

/// Default transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with the timeout and user agent from `config`.
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "remote".to_string(),
                value: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, timeout })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<u8>, RemoteError> {
        let FetchRequest { method, url, body } = request;

        let builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url).header(CONTENT_TYPE, "application/json"),
        };
        let builder = match body {
            Some(body) => builder.body(body),
            None => builder,
        };

        let response = builder
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Transport {
                url: url.clone(),
                reason: if e.is_timeout() {
                    format!("timed out after {}ms", self.timeout.as_millis())
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::Status {
                url,
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await.map_err(|e| RemoteError::Transport {
            url: url.clone(),
            reason: format!("failed to read body: {}", e),
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_constructors() {
        let get = FetchRequest::get("https://api.example/status/5");
        assert_eq!(get.method, Method::Get);
        assert!(get.body.is_none());

        let post = FetchRequest::post_json("https://api.example/universe/names", b"[1]".to_vec());
        assert_eq!(post.method, Method::Post);
        assert_eq!(post.body.as_deref(), Some(&b"[1]"[..]));
    }

    #[test]
    fn test_http_transport_rejects_invalid_config() {
        let config = RemoteConfig::new("ftp://api.example");
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn test_http_transport_uses_configured_timeout() {
        let mut config = RemoteConfig::new("https://api.example");
        config.request_timeout_ms = 2500;
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.timeout(), Duration::from_millis(2500));
    }
}
