//! Provider Configuration
//!
//! The closed set of upstream providers, model-name classification and
//! per-provider endpoint settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An upstream provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    OpenRouter,
    Chutes,
}

/// How a credential is attached to an upstream request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,

    /// `x-api-key: <key>`
    ApiKeyHeader,
}

impl Provider {
    /// Every provider, in a stable order
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::OpenRouter,
        Provider::Chutes,
    ];

    /// Classify a model name by its prefix.
    ///
    /// This is the only place model names are mapped to providers; names with
    /// no recognised prefix go to OpenAI.
    pub fn infer(model: &str) -> Provider {
        if model.starts_with("gpt-") {
            Provider::OpenAi
        } else if model.starts_with("claude-") {
            Provider::Anthropic
        } else if model.starts_with("openrouter/") {
            Provider::OpenRouter
        } else if model.starts_with("chutes/") {
            Provider::Chutes
        } else {
            Provider::OpenAi
        }
    }

    /// Configuration name of the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
            Provider::Chutes => "chutes",
        }
    }

    /// Path appended to the base URL for completion calls
    pub fn completion_path(&self) -> &'static str {
        match self {
            Provider::Anthropic => "/complete",
            Provider::OpenAi | Provider::OpenRouter | Provider::Chutes => "/chat/completions",
        }
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        match self {
            Provider::Anthropic => AuthScheme::ApiKeyHeader,
            Provider::OpenAi | Provider::OpenRouter | Provider::Chutes => AuthScheme::Bearer,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "openrouter" => Ok(Provider::OpenRouter),
            "chutes" => Ok(Provider::Chutes),
            other => Err(format!(
                "invalid provider '{}' (expected openai, anthropic, openrouter or chutes)",
                other
            )),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> Self {
        provider.as_str().to_string()
    }
}

/// Endpoint settings for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL for the API, e.g. `https://api.openai.com/v1`
    pub base_url: String,
}

/// Endpoint table keyed by provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<EndpointConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<EndpointConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openrouter: Option<EndpointConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chutes: Option<EndpointConfig>,
}

impl ProvidersConfig {
    /// Endpoint for a provider, if configured with a non-empty base URL
    pub fn endpoint(&self, provider: Provider) -> Option<&EndpointConfig> {
        let slot = match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::OpenRouter => &self.openrouter,
            Provider::Chutes => &self.chutes,
        };
        slot.as_ref().filter(|e| !e.base_url.trim().is_empty())
    }

    /// Full completion URL for a provider
    pub fn completion_url(&self, provider: Provider) -> Option<String> {
        self.endpoint(provider).map(|e| {
            format!(
                "{}{}",
                e.base_url.trim_end_matches('/'),
                provider.completion_path()
            )
        })
    }

    /// Overlay another table on this one (entries present in `other` win)
    pub fn merge(&mut self, other: ProvidersConfig) {
        if other.openai.is_some() {
            self.openai = other.openai;
        }
        if other.anthropic.is_some() {
            self.anthropic = other.anthropic;
        }
        if other.openrouter.is_some() {
            self.openrouter = other.openrouter;
        }
        if other.chutes.is_some() {
            self.chutes = other.chutes;
        }
    }
}
