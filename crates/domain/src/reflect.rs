use serde::{Deserialize, Serialize};

/// Roles that run a meta-reflection gate, each asking its own version of
/// "can I proceed?".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionRole {
    /// "Can I plan this?"
    Planner,
    /// "Can I execute this plan?"
    Coordinator,
    /// "Is the evidence sufficient?"
    Verifier,
}

impl ReflectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionRole::Planner => "planner",
            ReflectionRole::Coordinator => "coordinator",
            ReflectionRole::Verifier => "verifier",
        }
    }
}

/// Query type the reflection gate may classify alongside its decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Retry,
    Action,
    Recall,
    Informational,
    Clarification,
    Metadata,
}

impl QueryType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RETRY" => Some(QueryType::Retry),
            "ACTION" => Some(QueryType::Action),
            "RECALL" => Some(QueryType::Recall),
            "INFORMATIONAL" => Some(QueryType::Informational),
            "CLARIFICATION" => Some(QueryType::Clarification),
            "METADATA" => Some(QueryType::Metadata),
            _ => None,
        }
    }
}

/// A request for additional information issued by a NEED_INFO reflection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoRequest {
    /// "memory", "quick_search", "claims", …
    pub kind: String,
    pub query: String,
    pub reason: String,
    /// 1 = high, 2 = medium, 3 = low.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    1
}

/// The gate's decision, with the payload tied to the tag so the bounded
/// info-fetch re-entry loop cannot be miswired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MetaAction {
    /// Confidence cleared the accept threshold — continue to the next phase.
    Proceed,
    /// Confidence below the reject threshold — short-circuit with a
    /// clarifying question to the user.
    RequestClarification,
    /// Borderline confidence — escalate to a deeper check.
    NeedsAnalysis,
    /// Fetch the requested information, append it, and re-reflect
    /// (bounded to the configured number of rounds).
    NeedInfo { requests: Vec<InfoRequest> },
}

/// Full result of one reflection round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaReflectionResult {
    pub role: ReflectionRole,
    pub confidence: f64,
    pub action: MetaAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(default)]
    pub action_verbs: Vec<String>,
    /// Which reflection round produced this result (1-based).
    #[serde(default = "default_round")]
    pub round: u8,
}

fn default_round() -> u8 {
    1
}

impl MetaReflectionResult {
    pub fn can_proceed(&self) -> bool {
        matches!(self.action, MetaAction::Proceed)
    }

    /// Fallback result when the reflection call itself failed: proceed with
    /// caution rather than wedging the pipeline.
    pub fn degraded(role: ReflectionRole, reason: impl Into<String>) -> Self {
        Self {
            role,
            confidence: 0.6,
            action: MetaAction::Proceed,
            reason: reason.into(),
            query_type: None,
            action_verbs: Vec::new(),
            round: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_info_carries_requests() {
        let action = MetaAction::NeedInfo {
            requests: vec![InfoRequest {
                kind: "memory".into(),
                query: "hamster preferences".into(),
                reason: "prior turn referenced them".into(),
                priority: 1,
            }],
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action\":\"need_info\""));
        let back: MetaAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }

    #[test]
    fn degraded_result_proceeds() {
        let r = MetaReflectionResult::degraded(ReflectionRole::Planner, "llm timeout");
        assert!(r.can_proceed());
        assert!((r.confidence - 0.6).abs() < f64::EPSILON);
    }
}
