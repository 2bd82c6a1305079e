//! LLM endpoint clients.
//!
//! One adapter: any OpenAI-compatible chat-completions endpoint (OpenAI,
//! Azure-style proxies, Ollama, vLLM, LM Studio, Together, …). Responses
//! are parsed leniently — structural repair of the *content* is the
//! contract enforcer's job downstream.

pub mod openai_compat;
pub mod testing;
pub mod traits;

pub use openai_compat::OpenAiCompatClient;
pub use testing::ScriptedClient;
pub use traits::{ChatMessage, ChatRequest, ChatResponse, LlmClient, Usage};
