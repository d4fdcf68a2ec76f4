//! Client Module
//!
//! Upstream HTTP client and rate limit signal handling.

pub mod http;
pub mod rate_limiter;

pub use http::{is_stripped_header, UpstreamClient, UpstreamResponse};
