//! Configuration Loader
//!
//! Locates the gateway configuration file, overlays it on the built-in
//! provider endpoints, resolves secrets and validates the result.

use crate::config::gateway::GatewayConfig;
use crate::config::provider::ProvidersConfig;
use crate::error::{Result, RoxyError};
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: GatewayConfig,
    source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load from the first configuration file found in the default locations
    pub fn new() -> Result<Self> {
        let path = Self::get_config_paths()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                RoxyError::Config(
                    "no configuration file found; pass --config or set ROXY_CONFIG".to_string(),
                )
            })?;

        Self::from_path(path)
    }

    /// Load a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RoxyError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut loader = Self::from_yaml(&content).map_err(|e| match e {
            RoxyError::Config(msg) => RoxyError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        loader.source = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            keys = loader.config.api_keys.len(),
            rules = loader.config.model_rules.len(),
            "configuration loaded"
        );
        Ok(loader)
    }

    /// Load from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: GatewayConfig = serde_yaml::from_str(content)
            .map_err(|e| RoxyError::Config(format!("Failed to parse config: {}", e)))?;

        let mut providers = Self::builtin_providers()?;
        providers.merge(std::mem::take(&mut config.providers));
        config.providers = providers;

        config.resolve_secrets()?;
        config.validate()?;

        Ok(Self {
            config,
            source: None,
        })
    }

    /// Built-in provider endpoints
    fn builtin_providers() -> Result<ProvidersConfig> {
        let defaults = include_str!("../../providers.yaml");
        serde_yaml::from_str(defaults).map_err(|e| {
            RoxyError::Config(format!("Failed to parse built-in providers.yaml: {}", e))
        })
    }

    /// Get list of config paths to check, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var("ROXY_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("roxy.yaml"));
        paths.push(PathBuf::from("configs").join("config.yaml"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("roxy").join("config.yaml"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".roxy").join("config.yaml"));
        }

        paths
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// File the configuration came from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> GatewayConfig {
        self.config
    }
}
