//! Roxy Error Types
//!
//! Error taxonomy for the gateway and its mapping onto HTTP responses.

use crate::config::Provider;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum RoxyError {
    /// Configuration errors (unreadable file, invalid YAML, failed validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound payload could not be parsed
    #[error("Invalid request format: {0}")]
    MalformedRequest(String),

    /// Every credential for the provider is out of budget or cooling down
    #[error("No available API keys for provider '{0}'")]
    NoCredentialAvailable(Provider),

    /// Network or transport failure talking to an upstream
    #[error("Provider request to '{provider}' failed: {message}")]
    UpstreamUnreachable { provider: Provider, message: String },

    /// A candidate targets a provider with no configured endpoint
    #[error("Unsupported provider '{0}': no base_url configured")]
    UnsupportedProvider(Provider),

    /// Administrative command was not understood
    #[error("{0}")]
    Command(String),

    /// Recognised operation that this gateway does not perform
    #[error("{0}")]
    NotSupported(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoxyError {
    /// HTTP status reported to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            RoxyError::MalformedRequest(_)
            | RoxyError::UnsupportedProvider(_)
            | RoxyError::Command(_) => StatusCode::BAD_REQUEST,
            RoxyError::NoCredentialAvailable(_) => StatusCode::TOO_MANY_REQUESTS,
            RoxyError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            RoxyError::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            RoxyError::Config(_) | RoxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error class, mirrors the upstream error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            RoxyError::Config(_) => "config_error",
            RoxyError::MalformedRequest(_) => "invalid_request_error",
            RoxyError::NoCredentialAvailable(_) => "rate_limit_error",
            RoxyError::UpstreamUnreachable { .. } => "upstream_error",
            RoxyError::UnsupportedProvider(_) => "unsupported_provider",
            RoxyError::Command(_) => "command_error",
            RoxyError::NotSupported(_) => "not_supported",
            RoxyError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for RoxyError {
    fn from(err: reqwest::Error) -> Self {
        RoxyError::Internal(format!("HTTP client error: {}", err))
    }
}

impl From<serde_json::Error> for RoxyError {
    fn from(err: serde_json::Error) -> Self {
        RoxyError::Internal(format!("JSON encoding error: {}", err))
    }
}

impl From<serde_yaml::Error> for RoxyError {
    fn from(err: serde_yaml::Error) -> Self {
        RoxyError::Config(format!("YAML parsing error: {}", err))
    }
}

impl From<std::io::Error> for RoxyError {
    fn from(err: std::io::Error) -> Self {
        RoxyError::Config(format!("IO error: {}", err))
    }
}

impl IntoResponse for RoxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, RoxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RoxyError::MalformedRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RoxyError::NoCredentialAvailable(Provider::OpenAi).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            RoxyError::UpstreamUnreachable {
                provider: Provider::Anthropic,
                message: "refused".into(),
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RoxyError::UnsupportedProvider(Provider::Chutes).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RoxyError::NotSupported("nope".into()).status(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn test_display_names_provider() {
        let err = RoxyError::NoCredentialAvailable(Provider::OpenRouter);
        assert_eq!(err.to_string(), "No available API keys for provider 'openrouter'");
    }
}
