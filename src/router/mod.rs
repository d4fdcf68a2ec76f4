//! Router Module
//!
//! Handles model routing and API key pool management.

pub mod key_pool;
pub mod strategy;

pub use key_pool::{
    Credential, CredentialLease, CredentialPool, CredentialSnapshot, KeyPoolStats, DEFAULT_WINDOW,
    MAX_HOLD_OFF,
};
pub use strategy::{Candidate, Resolution, RoutingEngine, RoutingRule};
