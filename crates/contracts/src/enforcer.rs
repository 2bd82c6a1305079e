//! Parse-or-repair for every inter-phase payload.
//!
//! Each `parse_*` tries strict deserialization first, then a field-alias
//! repair, then returns a safe default. None of them ever return an error;
//! unrecoverable situations surface as degraded values plus a recorded
//! violation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::bundle::BundleStatus;
use cg_domain::capsule::{CapsuleClaim, CapsuleEnvelope};
use cg_domain::tool::{ToolCall, ToolOutput};

use crate::monitor::ContractMonitor;

/// Cap applied to repaired free-text fields pulled out of malformed plans.
const REPAIRED_TEXT_CAP: usize = 500;

/// A planner/synthesizer answer payload after enforcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuideResponse {
    pub answer: String,
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub needs_more_context: bool,
}

/// A coordinator tool plan after enforcement. An empty plan signals failure
/// without raising.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlannedCalls {
    pub plan: Vec<ToolCall>,
    #[serde(default)]
    pub reflection: String,
    pub confidence: f64,
}

/// Stateless enforcement functions sharing one violation monitor.
pub struct ContractEnforcer {
    monitor: Arc<ContractMonitor>,
}

impl ContractEnforcer {
    pub fn new(monitor: Arc<ContractMonitor>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> Arc<ContractMonitor> {
        self.monitor.clone()
    }

    // ── GuideResponse ──────────────────────────────────────────────

    /// Parse a planner/synthesizer answer. The `answer` string is sought
    /// under alternative field names, confidence is clamped to [0, 1], and
    /// sources are coerced to strings.
    pub fn parse_guide_response(&self, raw: &Value, fallback_answer: Option<&str>) -> GuideResponse {
        let fallback = || GuideResponse {
            answer: fallback_answer
                .unwrap_or("I encountered an issue processing your request. Could you rephrase?")
                .to_owned(),
            confidence: 0.0,
            sources: Vec::new(),
            needs_more_context: true,
        };

        let obj = match raw {
            Value::Object(map) => map,
            Value::String(s) if !s.trim().is_empty() => {
                return GuideResponse {
                    answer: s.clone(),
                    confidence: 0.5,
                    sources: Vec::new(),
                    needs_more_context: false,
                };
            }
            other => {
                self.monitor.record(
                    "guide",
                    "GuideResponse",
                    &format!("non-object payload: {}", value_kind(other)),
                    other,
                    false,
                    Some("fallback"),
                );
                return fallback();
            }
        };

        if let Ok(parsed) = serde_json::from_value::<GuideResponse>(raw.clone()) {
            if !parsed.answer.trim().is_empty() && (0.0..=1.0).contains(&parsed.confidence) {
                return parsed;
            }
        }

        // Repair: alternative answer fields, then any substantial string.
        let mut answer = ["answer", "response", "text", "content", "message"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_default();

        if answer.trim().is_empty() {
            answer = obj
                .values()
                .find_map(|v| v.as_str().filter(|s| s.len() > 20))
                .map(str::to_owned)
                .unwrap_or_default();
        }
        if answer.trim().is_empty() {
            // Last resort: dump the raw object.
            answer = serde_json::to_string_pretty(raw).unwrap_or_else(|_| "No response generated".into());
        }

        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
            .unwrap_or(0.5);

        let sources = obj
            .get("sources")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| match v {
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_owned),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let needs_more_context = obj
            .get("needs_more_context")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.monitor.record(
            "guide",
            "GuideResponse",
            "strict parse failed; repaired via field aliases",
            raw,
            true,
            Some("field_alias"),
        );

        GuideResponse {
            answer,
            confidence,
            sources,
            needs_more_context,
        }
    }

    // ── CoordinatorResponse ────────────────────────────────────────

    /// Parse a coordinator tool plan. Invalid items are dropped one by one;
    /// an unusable payload yields an empty plan at zero confidence.
    pub fn parse_coordinator_response(&self, raw: &Value) -> PlannedCalls {
        let obj = match raw {
            Value::Object(map) => map,
            // A bare array is treated as the plan itself.
            Value::Array(_) => {
                let mut wrapper = serde_json::Map::new();
                wrapper.insert("plan".into(), raw.clone());
                return self.parse_coordinator_response(&Value::Object(wrapper));
            }
            other => {
                self.monitor.record(
                    "coordinator",
                    "CoordinatorResponse",
                    &format!("non-object payload: {}", value_kind(other)),
                    other,
                    false,
                    Some("empty_plan"),
                );
                return PlannedCalls::default();
            }
        };

        if let Ok(parsed) = serde_json::from_value::<PlannedCalls>(raw.clone()) {
            if parsed.plan.iter().all(|c| !c.tool.trim().is_empty()) {
                return parsed;
            }
        }

        let raw_plan = obj.get("plan").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut plan = Vec::new();
        let mut dropped = 0usize;
        for item in &raw_plan {
            let Value::Object(entry) = item else {
                dropped += 1;
                continue;
            };
            let tool = ["tool", "name", "function", "action"]
                .iter()
                .find_map(|k| entry.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty());
            let Some(tool) = tool else {
                dropped += 1;
                continue;
            };
            let args = ["args", "arguments", "params", "parameters"]
                .iter()
                .find_map(|k| entry.get(*k))
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            let required = entry.get("required").and_then(Value::as_bool).unwrap_or(true);
            plan.push(ToolCall {
                tool: tool.to_owned(),
                args,
                required,
            });
        }

        let reflection: String = obj
            .get("reflection")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .chars()
            .take(REPAIRED_TEXT_CAP)
            .collect();

        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
            .unwrap_or(if plan.is_empty() { 0.0 } else { 0.8 });

        if dropped > 0 || raw_plan.is_empty() {
            self.monitor.record(
                "coordinator",
                "CoordinatorResponse",
                &format!("repaired plan: kept {}, dropped {dropped}", plan.len()),
                raw,
                !plan.is_empty(),
                Some("item_drop"),
            );
        }

        PlannedCalls {
            plan,
            reflection,
            confidence,
        }
    }

    // ── ToolOutput ─────────────────────────────────────────────────

    /// Wrap any raw tool response into a `ToolOutput`. Never fails.
    pub fn parse_tool_output(&self, raw: &Value, tool_name: &str) -> ToolOutput {
        // Already well-formed?
        if raw.get("success").and_then(Value::as_bool).is_some() {
            if let Ok(parsed) = serde_json::from_value::<ToolOutput>(raw.clone()) {
                return parsed;
            }
            self.monitor.record(
                tool_name,
                "ToolOutput",
                "success field present but shape invalid",
                raw,
                true,
                Some("wrap"),
            );
        }

        if let Some(error) = raw.get("error") {
            let message = error
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            let mut out = ToolOutput::failed(tool_name, message);
            if let Some(data) = raw.get("data") {
                out.data = data.clone();
            }
            return out;
        }

        if let Some(data) = ["result", "data", "output"].iter().find_map(|k| raw.get(*k)) {
            return ToolOutput::ok(tool_name, data.clone());
        }

        // Generic success wrap around the raw payload.
        ToolOutput::ok(tool_name, raw.clone())
    }

    // ── CapsuleEnvelope ────────────────────────────────────────────

    /// Parse a capsule envelope, dropping invalid claims individually. A
    /// partial envelope keeps `status = partial`; one with nothing usable
    /// comes back as `status = error`.
    pub fn parse_capsule_envelope(&self, raw: &Value, ticket_id: &str) -> CapsuleEnvelope {
        if let Ok(parsed) = serde_json::from_value::<CapsuleEnvelope>(raw.clone()) {
            return parsed;
        }

        let Value::Object(obj) = raw else {
            self.monitor.record(
                "verifier",
                "CapsuleEnvelope",
                &format!("non-object payload: {}", value_kind(raw)),
                raw,
                false,
                Some("empty_envelope"),
            );
            return CapsuleEnvelope::empty(ticket_id, BundleStatus::Error);
        };

        // Recover whatever claims validate.
        let mut recovered: Vec<CapsuleClaim> = Vec::new();
        if let Some(claims) = obj.get("claims").and_then(Value::as_array) {
            for raw_claim in claims {
                if let Ok(claim) = serde_json::from_value::<CapsuleClaim>(raw_claim.clone()) {
                    if claim.validate().is_ok() {
                        recovered.push(claim);
                    }
                }
            }
        }

        let status = if recovered.is_empty() {
            BundleStatus::Error
        } else {
            BundleStatus::Partial
        };
        let mut envelope = CapsuleEnvelope::empty(ticket_id, status);
        for claim in &recovered {
            let id = claim
                .claim_id
                .clone()
                .unwrap_or_else(|| cg_domain::claim::claim_id_for(&claim.claim));
            envelope.claim_summaries.insert(id.clone(), claim.claim.clone());
            envelope.claims_topk.push(id);
        }

        self.monitor.record(
            "verifier",
            "CapsuleEnvelope",
            &format!("repaired envelope: recovered {} claims", recovered.len()),
            raw,
            !recovered.is_empty(),
            Some("claim_salvage"),
        );
        envelope
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enforcer() -> ContractEnforcer {
        ContractEnforcer::new(Arc::new(ContractMonitor::new()))
    }

    #[test]
    fn guide_answer_found_under_alias() {
        let e = enforcer();
        let parsed = e.parse_guide_response(&json!({"response": "hello there", "confidence": 2.5}), None);
        assert_eq!(parsed.answer, "hello there");
        assert!((parsed.confidence - 0.5).abs() < f64::EPSILON); // out-of-range clamped to default
    }

    #[test]
    fn guide_bare_string_is_answer() {
        let e = enforcer();
        let parsed = e.parse_guide_response(&json!("just text"), None);
        assert_eq!(parsed.answer, "just text");
    }

    #[test]
    fn guide_null_uses_fallback() {
        let e = enforcer();
        let parsed = e.parse_guide_response(&Value::Null, Some("degraded"));
        assert_eq!(parsed.answer, "degraded");
        assert_eq!(parsed.confidence, 0.0);
        assert!(parsed.needs_more_context);
    }

    #[test]
    fn coordinator_aliases_and_drops() {
        let e = enforcer();
        let parsed = e.parse_coordinator_response(&json!({
            "plan": [
                {"function": "web.search", "parameters": {"q": "hamsters"}},
                {"no_tool_here": true},
                "not an object",
                {"tool": "file.read", "args": {"path": "a.md"}}
            ]
        }));
        assert_eq!(parsed.plan.len(), 2);
        assert_eq!(parsed.plan[0].tool, "web.search");
        assert_eq!(parsed.plan[0].args, json!({"q": "hamsters"}));
        assert_eq!(parsed.plan[1].tool, "file.read");
    }

    #[test]
    fn coordinator_garbage_yields_empty_plan() {
        let e = enforcer();
        let parsed = e.parse_coordinator_response(&json!(42));
        assert!(parsed.plan.is_empty());
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn coordinator_bare_array_is_the_plan() {
        let e = enforcer();
        let parsed =
            e.parse_coordinator_response(&json!([{"tool": "web.search", "args": {"q": "x"}}]));
        assert_eq!(parsed.plan.len(), 1);
    }

    #[test]
    fn tool_output_error_key_means_failure() {
        let e = enforcer();
        let out = e.parse_tool_output(&json!({"error": "404 not found"}), "web.visit");
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("404 not found"));
    }

    #[test]
    fn tool_output_result_key_means_success() {
        let e = enforcer();
        let out = e.parse_tool_output(&json!({"result": [1, 2, 3]}), "web.search");
        assert!(out.success);
        assert_eq!(out.data, json!([1, 2, 3]));
    }

    #[test]
    fn tool_output_generic_wrap() {
        let e = enforcer();
        let out = e.parse_tool_output(&json!("plain text body"), "file.read");
        assert!(out.success);
        assert_eq!(out.data, json!("plain text body"));
    }

    #[test]
    fn capsule_salvages_valid_claims() {
        let e = enforcer();
        let raw = json!({
            "claims": [
                {"claim": "good claim", "evidence": ["h1"]},
                {"claim": "no evidence claim", "evidence": []},
                {"bogus": true}
            ]
        });
        let envelope = e.parse_capsule_envelope(&raw, "t-1");
        assert_eq!(envelope.claims_topk.len(), 1);
        assert_eq!(envelope.status, BundleStatus::Partial);
    }

    #[test]
    fn capsule_nothing_usable_is_error() {
        let e = enforcer();
        let envelope = e.parse_capsule_envelope(&json!("nonsense"), "t-1");
        assert!(envelope.claims_topk.is_empty());
        assert_eq!(envelope.status, BundleStatus::Error);
    }
}
