use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How nested reflection gates share their info-fetch allowance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionBudgetMode {
    /// All roles draw from one per-turn round budget.
    #[default]
    SharedBudget,
    /// Each role gets its own round budget.
    PerRoleBudget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Confidence at or above this proceeds.
    #[serde(default = "d_accept")]
    pub accept_threshold: f64,
    /// Confidence below this requests clarification.
    #[serde(default = "d_reject")]
    pub reject_threshold: f64,
    /// Output cap for the reflection call.
    #[serde(default = "d_reflect_tokens")]
    pub max_tokens: usize,
    /// Info-fetch rounds allowed before a reflection must resolve.
    #[serde(default = "d_info_rounds")]
    pub max_info_rounds: u8,
    #[serde(default)]
    pub budget_mode: ReflectionBudgetMode,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            accept_threshold: d_accept(),
            reject_threshold: d_reject(),
            max_tokens: d_reflect_tokens(),
            max_info_rounds: d_info_rounds(),
            budget_mode: ReflectionBudgetMode::default(),
        }
    }
}

fn d_accept() -> f64 {
    0.8
}

fn d_reject() -> f64 {
    0.4
}

fn d_reflect_tokens() -> usize {
    120
}

fn d_info_rounds() -> u8 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    #[serde(default = "d_max_steps")]
    pub max_steps: usize,
    /// Concurrent tool invocations allowed within one agent step.
    #[serde(default = "d_tools_per_step")]
    pub tools_per_step: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            tools_per_step: d_tools_per_step(),
        }
    }
}

fn d_max_steps() -> usize {
    6
}

fn d_tools_per_step() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Token cap for the composed `context.md`.
    #[serde(default = "d_context_tokens")]
    pub context_max_tokens: usize,
    /// Recipe mode suffix: "chat" | "code".
    #[serde(default = "d_mode")]
    pub mode: String,
    /// Output cap for the cache-gate LLM evaluation.
    #[serde(default = "d_gate_tokens")]
    pub cache_gate_max_tokens: usize,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default)]
    pub agent: AgentLoopConfig,
    /// Use the LLM-assisted context builder recipe instead of simple
    /// concatenation.
    #[serde(default)]
    pub llm_context_builder: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_max_tokens: d_context_tokens(),
            mode: d_mode(),
            cache_gate_max_tokens: d_gate_tokens(),
            reflection: ReflectionConfig::default(),
            agent: AgentLoopConfig::default(),
            llm_context_builder: false,
        }
    }
}

fn d_context_tokens() -> usize {
    1500
}

fn d_mode() -> String {
    "chat".into()
}

fn d_gate_tokens() -> usize {
    250
}

impl PipelineConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CONTEXT_WINDOW_SIZE") {
            if let Ok(n) = v.parse() {
                self.context_max_tokens = n;
            }
        }
    }
}
