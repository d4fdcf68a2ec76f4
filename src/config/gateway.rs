//! Gateway Configuration
//!
//! Schema for the gateway configuration file: credentials, routing rules,
//! provider endpoints and cache/upstream tuning.

use crate::config::provider::{Provider, ProvidersConfig};
use crate::error::{Result, RoxyError};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to listen on; `:8080` binds all interfaces
    #[serde(default)]
    pub listen_addr: String,

    /// API credentials
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,

    /// Model substitution rules
    #[serde(default)]
    pub model_rules: Vec<ModelRule>,

    /// Provider endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream HTTP settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// One API credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Literal key value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Environment variable holding the key (takes precedence over `key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env_var: Option<String>,

    pub provider: Provider,

    /// Requests per minute
    pub max_rpm: u32,

    /// Tokens per minute
    pub max_tpm: u64,

    /// Hold-off applied after the upstream rate-limits this key
    #[serde(default)]
    pub cooldown_sec: u64,
}

impl ApiKeyConfig {
    /// Build a credential config from a literal key
    pub fn new(provider: Provider, key: impl Into<String>, max_rpm: u32, max_tpm: u64) -> Self {
        Self {
            key: Some(key.into()),
            key_env_var: None,
            provider,
            max_rpm,
            max_tpm,
            cooldown_sec: 0,
        }
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_sec = seconds;
        self
    }

    /// The resolved key value (empty until secrets are loaded)
    pub fn secret(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_sec)
    }

    /// Check the secret can be sent as an auth header under either scheme
    pub fn check_secret(&self) -> std::result::Result<(), String> {
        let secret = self.secret();
        let valid = HeaderValue::from_str(secret).is_ok()
            && HeaderValue::from_str(&format!("Bearer {}", secret)).is_ok();
        if valid {
            Ok(())
        } else {
            Err("key is not a valid HTTP header value".to_string())
        }
    }
}

/// Strategy for choosing among a rule's target models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SelectionPolicy {
    /// One uniformly random target
    Random,

    /// Rotate through targets, one per request
    RoundRobin,

    /// Try every target in order until one succeeds
    Fallback,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Random => "random",
            SelectionPolicy::RoundRobin => "roundrobin",
            SelectionPolicy::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(SelectionPolicy::Random),
            "roundrobin" => Ok(SelectionPolicy::RoundRobin),
            "fallback" => Ok(SelectionPolicy::Fallback),
            other => Err(format!(
                "invalid selection_policy '{}' (expected random, roundrobin or fallback)",
                other
            )),
        }
    }
}

impl TryFrom<String> for SelectionPolicy {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SelectionPolicy> for String {
    fn from(policy: SelectionPolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// Model substitution rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRule {
    #[serde(default)]
    pub source_model: String,

    #[serde(default)]
    pub target_models: Vec<String>,

    pub selection_policy: SelectionPolicy,
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Upstream HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_upstream_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_entries() -> usize {
    10_000
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl GatewayConfig {
    /// Address in a form `TcpListener::bind` accepts
    pub fn bind_addr(&self) -> String {
        let addr = self.listen_addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }

    /// Replace `key_env_var` references with the variable's value
    pub fn resolve_secrets(&mut self) -> Result<()> {
        for (i, key) in self.api_keys.iter_mut().enumerate() {
            if let Some(var) = key.key_env_var.as_deref().filter(|v| !v.is_empty()) {
                match std::env::var(var) {
                    Ok(value) if !value.is_empty() => key.key = Some(value),
                    _ => {
                        return Err(RoxyError::Config(format!(
                            "environment variable {} not set for API key {}",
                            var, i
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Check structural requirements
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(RoxyError::Config("listen_addr is required".to_string()));
        }

        if self.api_keys.is_empty() {
            return Err(RoxyError::Config(
                "at least one API key is required".to_string(),
            ));
        }

        for (i, key) in self.api_keys.iter().enumerate() {
            let has_key = key.key.as_deref().is_some_and(|k| !k.is_empty());
            let has_env = key.key_env_var.as_deref().is_some_and(|k| !k.is_empty());
            if !has_key && !has_env {
                return Err(RoxyError::Config(format!(
                    "api_keys[{}]: either key or key_env_var is required",
                    i
                )));
            }
            if has_key {
                key.check_secret()
                    .map_err(|e| RoxyError::Config(format!("api_keys[{}]: {}", i, e)))?;
            }
            if key.max_rpm == 0 {
                return Err(RoxyError::Config(format!(
                    "api_keys[{}]: max_rpm must be positive",
                    i
                )));
            }
            if key.max_tpm == 0 {
                return Err(RoxyError::Config(format!(
                    "api_keys[{}]: max_tpm must be positive",
                    i
                )));
            }
        }

        for (i, rule) in self.model_rules.iter().enumerate() {
            if rule.source_model.trim().is_empty() {
                return Err(RoxyError::Config(format!(
                    "model_rules[{}]: source_model is required",
                    i
                )));
            }
            if rule.target_models.is_empty() {
                return Err(RoxyError::Config(format!(
                    "model_rules[{}]: at least one target_model is required",
                    i
                )));
            }
            if rule.target_models.iter().any(|m| m.trim().is_empty()) {
                return Err(RoxyError::Config(format!(
                    "model_rules[{}]: target_models must not contain empty names",
                    i
                )));
            }
        }

        Ok(())
    }
}
