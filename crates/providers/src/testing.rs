//! Scripted LLM client for tests: returns canned responses in order, then
//! repeats the last one. Records every prompt it was asked.

use async_trait::async_trait;
use parking_lot::Mutex;

use cg_domain::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmClient};

pub struct ScriptedClient {
    id: String,
    responses: Mutex<Vec<ScriptedOutcome>>,
    cursor: Mutex<usize>,
    requests: Mutex<Vec<ChatRequest>>,
}

enum ScriptedOutcome {
    Ok(String),
    Err(String),
}

impl ScriptedClient {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            id: "llm.scripted".into(),
            responses: Mutex::new(responses.iter().map(|r| ScriptedOutcome::Ok((*r).to_owned())).collect()),
            cursor: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client that always fails, for breaker / degradation tests.
    pub fn always_failing(message: &str) -> Self {
        Self {
            id: "llm.scripted".into(),
            responses: Mutex::new(vec![ScriptedOutcome::Err(message.to_owned())]),
            cursor: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far (first message content of each request).
    pub fn seen_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.messages.first().map(|m| m.content.clone()).unwrap_or_default())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        let responses = self.responses.lock();
        if responses.is_empty() {
            return Err(Error::Other("scripted client has no responses".into()));
        }
        let mut cursor = self.cursor.lock();
        let index = (*cursor).min(responses.len().saturating_sub(1));
        *cursor += 1;
        match &responses[index] {
            ScriptedOutcome::Ok(content) => Ok(ChatResponse {
                content: content.clone(),
                model: "scripted".into(),
                usage: None,
            }),
            ScriptedOutcome::Err(message) => Err(Error::Endpoint {
                endpoint: self.id.clone(),
                message: message.clone(),
            }),
        }
    }

    fn endpoint_id(&self) -> &str {
        &self.id
    }
}
