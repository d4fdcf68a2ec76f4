//! HTTP Client
//!
//! Forwards completion requests to provider endpoints with the selected
//! credential attached.

use crate::client::rate_limiter;
use crate::config::{AuthScheme, Provider, ProvidersConfig, UpstreamConfig};
use crate::error::{Result, RoxyError};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Inbound headers never forwarded upstream
const STRIPPED_HEADERS: [&str; 11] = [
    "authorization",
    "x-api-key",
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "upgrade",
    "accept-encoding",
];

/// Whether a header is connection-scoped or carries caller credentials
pub fn is_stripped_header(name: &HeaderName) -> bool {
    STRIPPED_HEADERS.contains(&name.as_str())
}

/// A response received from an upstream, whatever its status
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_rate_limited(&self) -> bool {
        rate_limiter::is_rate_limited(self.status)
    }

    /// Hold-off the upstream asked for, if it sent one
    pub fn retry_after(&self) -> Option<Duration> {
        rate_limiter::retry_after(&self.headers)
    }
}

/// HTTP client for provider endpoints
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// Inner reqwest client
    client: Client,

    /// Endpoint table
    providers: ProvidersConfig,
}

impl UpstreamClient {
    pub fn new(providers: ProvidersConfig, upstream: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_seconds))
            .connect_timeout(Duration::from_secs(upstream.connect_timeout_seconds))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RoxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, providers })
    }

    pub fn providers(&self) -> &ProvidersConfig {
        &self.providers
    }

    /// Completion URL for `provider`, or `UnsupportedProvider` if none is configured
    pub fn completion_url(&self, provider: Provider) -> Result<String> {
        self.providers
            .completion_url(provider)
            .ok_or(RoxyError::UnsupportedProvider(provider))
    }

    /// Send `body` to the provider's completion endpoint with the caller's method.
    ///
    /// Any HTTP response, including 4xx/5xx, is returned as `Ok`; only
    /// transport failures produce `UpstreamUnreachable`.
    pub async fn send(
        &self,
        method: &Method,
        provider: Provider,
        secret: &str,
        inbound: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse> {
        let url = self.completion_url(provider)?;

        let mut headers = HeaderMap::new();
        for (name, value) in inbound {
            if !is_stripped_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match provider.auth_scheme() {
            AuthScheme::Bearer => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", secret))
                        .map_err(|e| RoxyError::Config(format!("Invalid API key format: {}", e)))?,
                );
            }
            AuthScheme::ApiKeyHeader => {
                headers.insert(
                    HeaderName::from_static("x-api-key"),
                    HeaderValue::from_str(secret)
                        .map_err(|e| RoxyError::Config(format!("Invalid API key format: {}", e)))?,
                );
            }
        }

        debug!(%provider, %method, %url, "forwarding request upstream");

        let unreachable = |e: reqwest::Error| {
            warn!(%provider, error = %e, "upstream request failed");
            RoxyError::UpstreamUnreachable {
                provider,
                message: e.to_string(),
            }
        };

        let response = self
            .client
            .request(method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(unreachable)?;

        debug!(%provider, status = status.as_u16(), bytes = body.len(), "upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
