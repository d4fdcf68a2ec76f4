//! Roxy - Chat Completion Routing Gateway
//!
//! An HTTP gateway that sits in front of several LLM providers, spreading
//! requests over a pool of rate-limited API keys, substituting models by
//! configured rules, falling back on upstream rate limits and caching
//! successful responses.

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod router;

use api::command::{self, Command};
use api::completion::{ChatRequest, Usage};
use cache::{Fingerprint, ResponseCache};
use client::{UpstreamClient, UpstreamResponse};
use config::GatewayConfig;
use error::{Result, RoxyError};
use router::{Candidate, CredentialPool, RoutingEngine, DEFAULT_WINDOW};

/// Where a reply came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource {
    Cache,
    Upstream(Candidate),
    Command,
}

/// A reply ready to be written back to the caller
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ReplySource,
}

impl GatewayReply {
    fn cached(body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status: StatusCode::OK,
            headers,
            body,
            source: ReplySource::Cache,
        }
    }

    fn text(body: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body),
            source: ReplySource::Command,
        }
    }

    fn upstream(response: UpstreamResponse, candidate: Candidate) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ReplySource::Upstream(candidate),
        }
    }
}

/// The gateway: credentials, routing rules, cache and upstream client
#[derive(Debug)]
pub struct Gateway {
    credentials: CredentialPool,
    routing: RoutingEngine,
    cache: ResponseCache,
    upstream: UpstreamClient,
}

impl Gateway {
    /// Build a gateway from validated configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Self::with_window(config, DEFAULT_WINDOW)
    }

    /// Build a gateway whose credential budgets reset every `window`
    pub fn with_window(config: &GatewayConfig, window: Duration) -> Result<Self> {
        Ok(Self {
            credentials: CredentialPool::with_window(&config.api_keys, window),
            routing: RoutingEngine::new(&config.model_rules)?,
            cache: ResponseCache::new(&config.cache),
            upstream: UpstreamClient::new(config.providers.clone(), &config.upstream)?,
        })
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    pub fn routing(&self) -> &RoutingEngine {
        &self.routing
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Handle one inbound body: a command or a completion request
    pub async fn handle(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<GatewayReply> {
        if command::is_command(&body) {
            let command = Command::parse(&body)?;
            debug!("running command");
            return command.execute(self).map(GatewayReply::text);
        }
        self.complete(method, headers, &body).await
    }

    /// Serve a completion request from the cache or the upstream candidates
    pub async fn complete(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<GatewayReply> {
        let request = ChatRequest::parse(body)?;
        let fingerprint = Fingerprint::of(&request);

        if let Some(cached) = self.cache.lookup(&fingerprint) {
            return Ok(GatewayReply::cached(cached));
        }

        let resolution = self.routing.resolve(&request.model);
        let mut candidates = resolution.candidates.iter();
        let first = candidates.next().ok_or_else(|| {
            RoxyError::Internal(format!("no candidates for model '{}'", request.model))
        })?;

        let mut served = first.clone();
        let mut response = self.attempt(first, &request, method, headers).await?;

        if response.is_rate_limited() && resolution.allows_fallback() {
            for candidate in candidates {
                match self.attempt(candidate, &request, method, headers).await {
                    Ok(next) => {
                        served = candidate.clone();
                        response = next;
                        if response.is_success() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%candidate, error = %e, "skipping fallback candidate");
                    }
                }
            }
        }

        debug!(
            model = %request.model,
            served = %served,
            status = response.status.as_u16(),
            "request completed"
        );

        if response.is_success() {
            self.cache.store(fingerprint, response.body.clone());
        }
        Ok(GatewayReply::upstream(response, served))
    }

    /// One upstream call for `candidate` with a freshly acquired credential
    async fn attempt(
        &self,
        candidate: &Candidate,
        request: &ChatRequest,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse> {
        self.upstream.completion_url(candidate.provider)?;
        let lease = self.credentials.acquire(candidate.provider)?;
        let body = request.body_for(&candidate.model)?;

        debug!(
            %candidate,
            key = %lease.credential().masked(),
            "attempting upstream"
        );

        let response = match self
            .upstream
            .send(method, candidate.provider, lease.secret(), headers, body)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                lease.release(0);
                return Err(e);
            }
        };

        if response.is_rate_limited() {
            let hold = response
                .retry_after()
                .unwrap_or_else(|| lease.credential().cooldown());
            warn!(%candidate, key = %lease.credential().masked(), "upstream rate limited");
            lease.cool_down(hold);
        }

        let consumed = if response.is_success() {
            Usage::from_body(&response.body).map_or(0, |u| u.total())
        } else {
            0
        };
        lease.release(consumed);

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, Provider};

    fn config(base_url: &str, extra: &str) -> GatewayConfig {
        let yaml = format!(
            r#"
listen_addr: ":8080"
api_keys:
  - key: "sk-openai"
    provider: openai
    max_rpm: 2
    max_tpm: 1000000
  - key: "sk-ant"
    provider: anthropic
    max_rpm: 5
    max_tpm: 1000000
    cooldown_sec: 60
providers:
  openai: {{ base_url: "{url}" }}
  anthropic: {{ base_url: "{url}" }}
{extra}
"#,
            url = base_url,
            extra = extra
        );
        ConfigLoader::from_yaml(&yaml).unwrap().into_config()
    }

    async fn post(gateway: &Gateway, body: Bytes) -> Result<GatewayReply> {
        gateway.handle(&Method::POST, &HeaderMap::new(), body).await
    }

    fn body(model: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"model":"{}","messages":[{{"role":"user","content":"Hello"}}]}}"#,
            model
        ))
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"id":"a","usage":{"total_tokens":42}}"#)
            .expect(1)
            .create_async()
            .await;

        let gateway = Gateway::from_config(&config(&server.url(), "")).unwrap();

        let first = post(&gateway, body("gpt-4")).await.unwrap();
        let second = post(&gateway, body("gpt-4")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(first.body, second.body);
        assert_eq!(second.source, ReplySource::Cache);
        assert_eq!(gateway.credentials().snapshot()[0].tokens_used, 42);
        assert_eq!(gateway.credentials().snapshot()[0].usage_count, 1);
    }

    #[tokio::test]
    async fn test_fallback_after_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let openai = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":"rate limited"}"#)
            .expect(1)
            .create_async()
            .await;
        let anthropic = server
            .mock("POST", "/complete")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"claude-2"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"completion":"hi"}"#)
            .expect(1)
            .create_async()
            .await;

        let rules = r#"
model_rules:
  - source_model: gpt-4
    target_models: [gpt-4, claude-2]
    selection_policy: fallback
"#;
        let gateway = Gateway::from_config(&config(&server.url(), rules)).unwrap();

        let reply = post(&gateway, body("gpt-4")).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            reply.source,
            ReplySource::Upstream(Candidate::for_model("claude-2"))
        );

        // cached under the original request
        let again = post(&gateway, body("gpt-4")).await.unwrap();
        assert_eq!(again.source, ReplySource::Cache);
        assert_eq!(again.body, reply.body);

        openai.assert_async().await;
        anthropic.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_without_fallback_is_forwarded_and_cools_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/complete")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let gateway = Gateway::from_config(&config(&server.url(), "")).unwrap();

        let reply = post(&gateway, body("claude-2")).await.unwrap();
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reply.body, Bytes::from_static(b"slow down"));
        assert_eq!(gateway.credentials().stats(Provider::Anthropic).cooling_down_keys, 1);

        // the only anthropic key is on hold now
        let err = post(&gateway, body("claude-3")).await.unwrap_err();
        assert!(matches!(err, RoxyError::NoCredentialAvailable(Provider::Anthropic)));
    }

    #[tokio::test]
    async fn test_oversized_retry_after_is_capped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/complete")
            .with_status(429)
            .with_header("retry-after", "18446744073709551615")
            .with_body("slow down")
            .create_async()
            .await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("x-ratelimit-reset-requests", "99999999999999999999999s")
            .with_body("slow down")
            .create_async()
            .await;

        let gateway = Gateway::from_config(&config(&server.url(), "")).unwrap();

        let reply = post(&gateway, body("claude-2")).await.unwrap();
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        let reply = post(&gateway, body("gpt-4")).await.unwrap();
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(gateway.credentials().stats(Provider::Anthropic).cooling_down_keys, 1);
        // unparseable reset falls back to the key's cooldown, which is zero here
        assert_eq!(gateway.credentials().stats(Provider::OpenAi).cooling_down_keys, 0);
    }

    #[tokio::test]
    async fn test_inbound_method_is_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", "/chat/completions")
            .match_header("authorization", "Bearer sk-openai")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let post_mock = server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let gateway = Gateway::from_config(&config(&server.url(), "")).unwrap();
        let reply = gateway
            .handle(&Method::PUT, &HeaderMap::new(), body("gpt-4"))
            .await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);

        put.assert_async().await;
        post_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_request_consumes_nothing() {
        let gateway = Gateway::from_config(&config("http://127.0.0.1:9", "")).unwrap();

        let err = post(&gateway, Bytes::from_static(b"not json")).await.unwrap_err();
        assert!(matches!(err, RoxyError::MalformedRequest(_)));
        assert!(gateway
            .credentials()
            .snapshot()
            .iter()
            .all(|s| s.usage_count == 0 && s.total_requests == 0));
    }

    #[tokio::test]
    async fn test_key_budget_exhaustion() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let gateway = Gateway::from_config(&config(&server.url(), "")).unwrap();

        for _ in 0..2 {
            let reply = post(&gateway, body("gpt-4")).await.unwrap();
            assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        }
        let err = post(&gateway, body("gpt-4")).await.unwrap_err();
        assert!(matches!(err, RoxyError::NoCredentialAvailable(Provider::OpenAi)));
        assert!(gateway.cache().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_rejected_before_acquire() {
        let mut config = config("http://127.0.0.1:9", "");
        config.providers.chutes = None;
        config
            .api_keys
            .push(crate::config::ApiKeyConfig::new(Provider::Chutes, "ck", 5, 1000));
        let gateway = Gateway::from_config(&config).unwrap();

        let err = post(&gateway, body("chutes/qwen")).await.unwrap_err();
        assert!(matches!(err, RoxyError::UnsupportedProvider(Provider::Chutes)));
        assert_eq!(gateway.credentials().stats(Provider::Chutes).total_requests, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_bad_gateway() {
        let gateway = Gateway::from_config(&config("http://127.0.0.1:9", "")).unwrap();
        let err = post(&gateway, body("gpt-4")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_command_dispatch() {
        let gateway = Gateway::from_config(&config("http://127.0.0.1:9", "")).unwrap();
        let reply = post(&gateway, Bytes::from_static(b"#roxy help")).await.unwrap();
        assert_eq!(reply.source, ReplySource::Command);
        assert!(String::from_utf8_lossy(&reply.body).contains("Available commands"));
    }
}
