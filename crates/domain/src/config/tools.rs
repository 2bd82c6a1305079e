use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution subsystem
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionConfig {
    /// Seconds before a pending intervention is marked unresolved.
    #[serde(default = "d_intervention_timeout")]
    pub timeout_secs: u64,
    /// File-queue polling cadence (must stay <= 2s per protocol).
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_intervention_timeout(),
            poll_interval_secs: d_poll_interval(),
        }
    }
}

fn d_intervention_timeout() -> u64 {
    90
}

fn d_poll_interval() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Base URL of the tool server; calls go to `<server_url>/<tool_name>`.
    #[serde(default = "d_server_url")]
    pub server_url: String,
    #[serde(default = "d_tool_timeout")]
    pub timeout_secs: u64,
    /// Tool names that require out-of-band user approval before running.
    #[serde(default = "d_approval_required")]
    pub approval_required: Vec<String>,
    #[serde(default)]
    pub intervention: InterventionConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            server_url: d_server_url(),
            timeout_secs: d_tool_timeout(),
            approval_required: d_approval_required(),
            intervention: InterventionConfig::default(),
        }
    }
}

fn d_server_url() -> String {
    "http://127.0.0.1:8731".into()
}

fn d_tool_timeout() -> u64 {
    60
}

fn d_approval_required() -> Vec<String> {
    vec!["file.write".into(), "file.edit".into(), "bash.execute".into()]
}
