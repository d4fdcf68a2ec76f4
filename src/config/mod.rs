//! Configuration Module
//!
//! Handles gateway configuration loading and validation.

pub mod gateway;
pub mod loader;
pub mod provider;

pub use gateway::{
    ApiKeyConfig, CacheConfig, GatewayConfig, ModelRule, SelectionPolicy, UpstreamConfig,
};
pub use loader::ConfigLoader;
pub use provider::{AuthScheme, EndpointConfig, Provider, ProvidersConfig};
