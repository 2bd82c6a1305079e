use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EndpointConfig {
    /// Base URL up to but excluding `/chat/completions`.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// API key, sent as `Authorization: Bearer <key>`. Prefer the env
    /// override to putting keys in the config file.
    #[serde(default)]
    pub api_key: String,
}

fn d_model() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Planner / verifier / synthesizer endpoint ("guide" in the env names).
    #[serde(default)]
    pub planner: EndpointConfig,
    /// Coordinator endpoint; may equal the planner.
    #[serde(default)]
    pub coordinator: EndpointConfig,
    /// Hard deadline for every LLM call, in seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// Global concurrency cap on outbound LLM calls per endpoint.
    #[serde(default = "d_concurrency")]
    pub max_concurrent: usize,
    /// Overall token budget hint handed to recipes that omit one.
    #[serde(default = "d_token_budget")]
    pub token_budget: usize,
    /// Upper bound on agent-loop cycles when the recipe omits one.
    #[serde(default = "d_max_cycles")]
    pub max_cycles: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            planner: EndpointConfig::default(),
            coordinator: EndpointConfig::default(),
            timeout_secs: d_timeout(),
            max_concurrent: d_concurrency(),
            token_budget: d_token_budget(),
            max_cycles: d_max_cycles(),
        }
    }
}

fn d_timeout() -> u64 {
    90
}

fn d_concurrency() -> usize {
    4
}

fn d_token_budget() -> usize {
    4000
}

fn d_max_cycles() -> usize {
    6
}

impl LlmConfig {
    /// Canonical env names: `GUIDE_URL`, `GUIDE_MODEL_ID`, `GUIDE_API_KEY`,
    /// `COORDINATOR_URL`, `COORDINATOR_MODEL_ID`, `COORDINATOR_API_KEY`,
    /// `MODEL_TIMEOUT`, `TOKEN_BUDGET`, `MAX_CYCLES`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GUIDE_URL") {
            self.planner.base_url = v;
        }
        if let Ok(v) = std::env::var("GUIDE_MODEL_ID") {
            self.planner.model = v;
        }
        if let Ok(v) = std::env::var("GUIDE_API_KEY") {
            self.planner.api_key = v;
        }
        if let Ok(v) = std::env::var("COORDINATOR_URL") {
            self.coordinator.base_url = v;
        }
        if let Ok(v) = std::env::var("COORDINATOR_MODEL_ID") {
            self.coordinator.model = v;
        }
        if let Ok(v) = std::env::var("COORDINATOR_API_KEY") {
            self.coordinator.api_key = v;
        }
        if let Ok(v) = std::env::var("MODEL_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("TOKEN_BUDGET") {
            if let Ok(n) = v.parse() {
                self.token_budget = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_CYCLES") {
            if let Ok(n) = v.parse() {
                self.max_cycles = n;
            }
        }
    }

    /// The coordinator endpoint, defaulting to the planner when unset.
    pub fn coordinator_or_planner(&self) -> &EndpointConfig {
        if self.coordinator.base_url.trim().is_empty() {
            &self.planner
        } else {
            &self.coordinator
        }
    }
}
