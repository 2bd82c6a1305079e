use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation produced by the Coordinator.
///
/// Tool names are dotted (`file.read`, `web.search`); the category prefix
/// (`file`, `web`, …) is what the tool circuit breaker keys on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            required: true,
        }
    }

    /// The breaker category for this call: everything before the first dot,
    /// or the whole name for undotted tools.
    pub fn category(&self) -> &str {
        self.tool.split('.').next().unwrap_or(&self.tool)
    }
}

/// Normalized result of any tool invocation.
///
/// Raw tool responses always pass through the contract enforcer into this
/// shape; downstream phases never see a bare error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl ToolOutput {
    /// Success wrapper around an arbitrary payload.
    pub fn ok(tool: &str, data: Value) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".into(), Value::String(tool.to_owned()));
        Self {
            success: true,
            data,
            error: None,
            metadata,
        }
    }

    /// Failure wrapper carrying an error message.
    pub fn failed(tool: &str, error: impl Into<String>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".into(), Value::String(tool.to_owned()));
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata,
        }
    }

    /// Synthetic failure emitted when a tool's circuit is OPEN and the call
    /// was skipped entirely.
    pub fn circuit_open(tool: &str, component: &str) -> Self {
        let mut out = Self::failed(tool, format!("circuit open for {component}; call skipped"));
        out.metadata
            .insert("circuit_open".into(), Value::Bool(true));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_prefix_before_dot() {
        let call = ToolCall::new("web.search", serde_json::json!({"q": "hamsters"}));
        assert_eq!(call.category(), "web");
    }

    #[test]
    fn category_of_undotted_tool_is_full_name() {
        let call = ToolCall::new("bash", serde_json::json!({}));
        assert_eq!(call.category(), "bash");
    }

    #[test]
    fn circuit_open_output_is_flagged() {
        let out = ToolOutput::circuit_open("web.search", "web");
        assert!(!out.success);
        assert_eq!(out.metadata.get("circuit_open"), Some(&serde_json::Value::Bool(true)));
    }
}
