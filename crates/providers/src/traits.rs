use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cg_domain::Result;

/// A chat message in wire order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub top_p: Option<f64>,
}

impl ChatRequest {
    /// The common single-prompt form used by the pipeline phases.
    pub fn from_prompt(prompt: impl Into<String>, max_tokens: u32, temperature: f64) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            stop: None,
            top_p: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

/// An LLM endpoint. Implementations enforce the hard per-call deadline and
/// surface timeouts as `Error::Timeout` so the circuit breaker can account
/// for them.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Stable identifier used as the breaker component key.
    fn endpoint_id(&self) -> &str;
}
