//! The turn runtime: one module per pipeline phase plus the orchestrator
//! that drives them, and the shared LLM-call plumbing.

pub mod cache_gate;
pub mod cancel;
pub mod context_builder;
pub mod coordinator;
pub mod executor;
pub mod planner;
pub mod reflection;
pub mod session_lock;
pub mod summarizer;
pub mod synthesizer;
pub mod turn;
pub mod verifier;

use cg_providers::ChatRequest;
use cg_domain::Result;

use crate::state::AppState;

/// Which configured endpoint a phase talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    /// Planner / verifier / synthesizer / reflection / gate calls.
    Planner,
    /// Executor / coordinator calls.
    Coordinator,
}

/// One guarded LLM call: outbound-concurrency semaphore, then the LLM
/// circuit breaker, then the endpoint itself. Timeouts and endpoint errors
/// count against the breaker; `CircuitOpen` is returned without calling.
pub async fn guarded_llm_call(
    state: &AppState,
    role: LlmRole,
    prompt: String,
    max_tokens: u32,
    temperature: f64,
) -> Result<String> {
    let client = match role {
        LlmRole::Planner => state.planner_llm.clone(),
        LlmRole::Coordinator => state.coordinator_llm.clone(),
    };
    let component = client.endpoint_id().to_owned();

    let _permit = state
        .llm_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| cg_domain::Error::Other("llm semaphore closed".into()))?;

    let request = ChatRequest::from_prompt(prompt, max_tokens, temperature);
    let response = state
        .llm_breaker
        .call(&component, || async { client.complete(&request).await })
        .await?;
    Ok(response.content)
}

/// Prompt preamble for a role, loaded through the recipe system. Returns an
/// empty string when the role has no recipe on disk — every phase carries an
/// inline default for exactly that case.
pub fn role_prompt_preamble(state: &AppState, role: &str) -> String {
    let mode = state.config.pipeline.mode.clone();
    match state.recipes.select(role, &mode, None) {
        Ok(recipe) => match state.recipes.prompt_text(&recipe) {
            Ok(text) if !text.trim().is_empty() => format!("{text}\n\n"),
            _ => String::new(),
        },
        Err(_) => String::new(),
    }
}

/// Pull the first JSON object out of an LLM reply that may wrap it in prose
/// or code fences. Returns `Value::Null` when nothing parses.
pub fn extract_json(text: &str) -> serde_json::Value {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return value;
    }

    // Fenced block first.
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.find("```") {
            if let Ok(value) = serde_json::from_str(rest[..end].trim()) {
                return value;
            }
        }
    }

    // Outermost brace span.
    if let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&text[open..=close]) {
                return value;
            }
        }
    }
    serde_json::Value::Null
}
