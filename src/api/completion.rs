//! Chat Completion Payloads
//!
//! Inbound request parsing, model substitution on the outbound body and
//! token usage extraction from upstream responses.

use crate::error::{Result, RoxyError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", "assistant", or "tool"
    pub role: String,

    /// Message content; `null` for assistant turns that only carry tool calls
    #[serde(default)]
    pub content: Option<MessageContent>,

    /// Fields forwarded untouched (name, tool_calls, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message content - can be a simple string or array of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content
    Text(String),

    /// Array of content parts (for multimodal)
    Parts(Vec<Value>),
}

/// Inbound chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model
    pub model: String,

    /// Messages in the conversation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    /// Legacy single-prompt form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Additional parameters (provider-specific)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Parse an inbound body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let request: ChatRequest = serde_json::from_slice(body)
            .map_err(|e| RoxyError::MalformedRequest(e.to_string()))?;
        if request.model.trim().is_empty() {
            return Err(RoxyError::MalformedRequest(
                "model must not be empty".to_string(),
            ));
        }
        Ok(request)
    }

    /// Serialize the request for upstream with `model` substituted
    pub fn body_for(&self, model: &str) -> Result<Bytes> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("model".to_string(), Value::String(model.to_string()));
        }
        Ok(Bytes::from(serde_json::to_vec(&value)?))
    }
}

/// Token usage reported by an upstream response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    usage: Option<Usage>,
}

impl Usage {
    /// Read the `usage` object of a response body, if it has one
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<UsageEnvelope>(body).ok()?.usage
    }

    /// Tokens consumed, across OpenAI and Anthropic field names
    pub fn total(&self) -> u64 {
        if let Some(total) = self.total_tokens {
            return total;
        }
        let openai = self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0);
        let anthropic = self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0);
        openai.max(anthropic)
    }
}
