//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint following the chat-completions contract. Response parsing is
//! lenient: a missing `content` yields an empty string rather than an error
//! — malformed payloads are the contract enforcer's problem, transport and
//! HTTP failures are ours.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use cg_domain::config::EndpointConfig;
use cg_domain::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmClient, Usage};

pub struct OpenAiCompatClient {
    id: String,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Build from an endpoint config. `id` becomes the breaker component
    /// key (`llm.planner`, `llm.coordinator`, …).
    pub fn from_config(id: impl Into<String>, cfg: &EndpointConfig, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            timeout,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(stop) = &req.stop {
            body["stop"] = serde_json::json!(stop);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        body
    }
}

fn parse_chat_response(body: &Value) -> ChatResponse {
    let content = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();

    let usage = body.get("usage").and_then(|u| {
        Some(Usage {
            prompt_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
            completion_tokens: u.get("completion_tokens")?.as_u64()? as u32,
            total_tokens: u.get("total_tokens")?.as_u64()? as u32,
        })
    });

    ChatResponse {
        content,
        model,
        usage,
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(endpoint = %self.id, url = %url, "chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Endpoint {
                endpoint: self.id.clone(),
                message: format!("HTTP {} - {text}", status.as_u16()),
            });
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| Error::Endpoint {
            endpoint: self.id.clone(),
            message: format!("non-JSON response: {e}"),
        })?;
        Ok(parse_chat_response(&json))
    }

    fn endpoint_id(&self) -> &str {
        &self.id
    }
}
