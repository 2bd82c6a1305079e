//! Phase 2 — the meta-reflection gate.
//!
//! Before planning (and again before execution and verification), the LLM
//! is asked one short question: can I proceed? The reply is line-oriented:
//!
//! ```text
//! QUERY_TYPE: ACTION
//! ACTION_VERBS: find, search
//! CONFIDENCE: 0.85
//! REASON: query names a concrete target
//! DECISION: PROCEED
//! INFO_REQUESTS:
//! - type: memory
//!   query: hamster preferences
//!   reason: prior turn referenced them
//!   priority: 1
//! ```
//!
//! Thresholds decide the action: confidence at or above the accept
//! threshold proceeds, below the reject threshold asks the user to clarify,
//! NEED_INFO triggers a bounded info-fetch loop, and everything else is
//! NEEDS_ANALYSIS. A failed gate call degrades to proceed-with-caution.

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

use cg_domain::reflect::{
    InfoRequest, MetaAction, MetaReflectionResult, QueryType, ReflectionRole,
};

use crate::runtime::{guarded_llm_call, LlmRole};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RoleStats {
    pub calls: u64,
    pub proceed: u64,
    pub clarify: u64,
    pub analyze: u64,
    pub need_info: u64,
}

/// Per-role reflection counters, reported on the status API.
#[derive(Default)]
pub struct ReflectionStats {
    by_role: RwLock<HashMap<String, RoleStats>>,
}

impl ReflectionStats {
    pub fn record(&self, result: &MetaReflectionResult) {
        let mut map = self.by_role.write();
        let entry = map.entry(result.role.as_str().to_owned()).or_default();
        entry.calls += 1;
        match &result.action {
            MetaAction::Proceed => entry.proceed += 1,
            MetaAction::RequestClarification => entry.clarify += 1,
            MetaAction::NeedsAnalysis => entry.analyze += 1,
            MetaAction::NeedInfo { .. } => entry.need_info += 1,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, RoleStats> {
        self.by_role.read().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ask the gate question for `role`. `input` is role-specific (the query
/// for the planner, the goal for the coordinator, an evidence summary for
/// the verifier); `live_context` is whatever recent context helps the
/// model decide.
pub async fn can_i_proceed(
    state: &AppState,
    role: ReflectionRole,
    input: &str,
    live_context: &str,
    round: u8,
) -> MetaReflectionResult {
    let preamble = crate::runtime::role_prompt_preamble(state, "reflection");
    let prompt = format!("{preamble}{}", build_prompt(role, input, live_context, round));
    let max_tokens = state.config.pipeline.reflection.max_tokens as u32;

    let result = match guarded_llm_call(state, LlmRole::Planner, prompt, max_tokens, 0.4).await {
        Ok(response) => {
            let mut parsed = parse_response(&response, role, state);
            parsed.round = round;
            parsed
        }
        Err(e) => {
            tracing::warn!(role = role.as_str(), error = %e, "meta-reflection call failed");
            MetaReflectionResult::degraded(
                role,
                format!("meta-reflection error, proceeding with caution: {e}"),
            )
        }
    };

    state.reflection_stats.record(&result);
    tracing::info!(
        role = role.as_str(),
        round,
        confidence = result.confidence,
        action = ?action_name(&result.action),
        "meta-reflection: {}",
        result.reason
    );
    result
}

fn action_name(action: &MetaAction) -> &'static str {
    match action {
        MetaAction::Proceed => "proceed",
        MetaAction::RequestClarification => "request_clarification",
        MetaAction::NeedsAnalysis => "needs_analysis",
        MetaAction::NeedInfo { .. } => "need_info",
    }
}

fn build_prompt(role: ReflectionRole, input: &str, live_context: &str, round: u8) -> String {
    let (question, input_label) = match role {
        ReflectionRole::Planner => ("Can I plan this?", "Query"),
        ReflectionRole::Coordinator => ("Can I execute this plan?", "Goal"),
        ReflectionRole::Verifier => ("Is the evidence sufficient?", "Evidence summary"),
    };
    let context = if live_context.trim().is_empty() {
        "(no context - first turn)"
    } else {
        live_context
    };
    format!(
        "You are the {role} gate. Ask yourself: {question}\n\
         Classify the query type (RETRY/ACTION/RECALL/INFORMATIONAL/CLARIFICATION/METADATA) \
         and evaluate your confidence.\n\n\
         Respond ONLY in this format:\n\
         QUERY_TYPE: [type]\n\
         ACTION_VERBS: [comma-separated verbs, or none]\n\
         CONFIDENCE: [0.0-1.0]\n\
         REASON: [one sentence]\n\
         DECISION: [PROCEED or NEED_INFO or CLARIFY]\n\
         INFO_REQUESTS: (only with NEED_INFO)\n\
         - type: [memory|quick_search|claims]\n\
           query: [lookup term]\n\
           reason: [why]\n\
           priority: [1-3]\n\n\
         ---\n\n\
         **{input_label}:** \"{input}\"\n\n\
         **Context (reflection round {round}):**\n{context}\n\n\
         Now classify and respond:",
        role = role.as_str(),
    )
}

/// Parse the line-oriented reply. Missing confidence defaults to 0.5;
/// legacy `CAN_PROCEED: YES|NO|UNSURE` is accepted.
fn parse_response(response: &str, role: ReflectionRole, state: &AppState) -> MetaReflectionResult {
    let cfg = &state.config.pipeline.reflection;

    let confidence = Regex::new(r"(?i)CONFIDENCE:\s*([01](?:\.\d+)?)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or_else(|| {
            tracing::warn!(role = role.as_str(), "could not parse reflection confidence");
            0.5
        });

    let decision = Regex::new(r"(?i)DECISION:\s*(PROCEED|NEED_INFO|CLARIFY|YES|NO|UNSURE)")
        .ok()
        .and_then(|re| re.captures(response))
        .or_else(|| {
            Regex::new(r"(?i)CAN_PROCEED:\s*(YES|NO|UNSURE)")
                .ok()
                .and_then(|re| re.captures(response))
        })
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_else(|| "UNSURE".to_owned());

    let reason = Regex::new(r"REASON:\s*(.+)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .unwrap_or_else(|| "No reason provided".to_owned());

    let query_type = Regex::new(r"(?i)QUERY_TYPE:\s*(\w+)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .and_then(|m| QueryType::parse(m.as_str()));

    let action_verbs = Regex::new(r"(?i)ACTION_VERBS:\s*(.+)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.eq_ignore_ascii_case("none"))
        .map(|verbs| {
            verbs
                .split(',')
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let info_requests = parse_info_requests(response);

    let action = if (decision == "PROCEED" || decision == "YES") && confidence >= cfg.accept_threshold
    {
        MetaAction::Proceed
    } else if decision == "NEED_INFO" {
        MetaAction::NeedInfo {
            requests: info_requests.clone(),
        }
    } else if decision == "CLARIFY" || decision == "NO" || confidence < cfg.reject_threshold {
        MetaAction::RequestClarification
    } else {
        MetaAction::NeedsAnalysis
    };

    MetaReflectionResult {
        role,
        confidence,
        action,
        reason,
        query_type,
        action_verbs,
        round: 1,
    }
}

fn parse_info_requests(response: &str) -> Vec<InfoRequest> {
    let Some(start) = response.find("INFO_REQUESTS:") else {
        return Vec::new();
    };

    let mut requests = Vec::new();
    let mut current: Option<InfoRequest> = None;
    for line in response[start..].lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some(kind) = line.strip_prefix("- type:") {
            if let Some(done) = current.take() {
                if !done.query.is_empty() {
                    requests.push(done);
                }
            }
            current = Some(InfoRequest {
                kind: kind.trim().to_owned(),
                query: String::new(),
                reason: String::new(),
                priority: 1,
            });
        } else if let Some(req) = current.as_mut() {
            if let Some(query) = line.strip_prefix("query:") {
                req.query = query.trim().to_owned();
            } else if let Some(reason) = line.strip_prefix("reason:") {
                req.reason = reason.trim().to_owned();
            } else if let Some(priority) = line.strip_prefix("priority:") {
                req.priority = priority.trim().parse().unwrap_or(1);
            }
        }
    }
    if let Some(done) = current {
        if !done.query.is_empty() {
            requests.push(done);
        }
    }
    requests
}

/// Render the reflection result as `meta_reflection.md` content.
pub fn render_document(results: &[MetaReflectionResult]) -> String {
    let mut out = String::from("# Meta-Reflection\n");
    for result in results {
        out.push_str(&format!(
            "\n## Round {} — {}\n- confidence: {:.2}\n- action: {}\n- reason: {}\n",
            result.round,
            result.role.as_str(),
            result.confidence,
            action_name(&result.action),
            result.reason
        ));
        if let Some(qt) = &result.query_type {
            out.push_str(&format!("- query_type: {qt:?}\n"));
        }
        if let MetaAction::NeedInfo { requests } = &result.action {
            for req in requests {
                out.push_str(&format!("- info request ({}): {}\n", req.kind, req.query));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // parse_response needs an AppState only for thresholds; build a minimal
    // config wrapper instead of the full state.
    fn thresholds() -> cg_domain::config::ReflectionConfig {
        cg_domain::config::ReflectionConfig::default()
    }

    fn parse(response: &str) -> MetaReflectionResult {
        // Inline reimplementation of the threshold logic for parser tests:
        // reuse parse_response via a throwaway state is heavyweight, so test
        // through the pure pieces instead.
        let cfg = thresholds();
        let confidence = Regex::new(r"(?i)CONFIDENCE:\s*([01](?:\.\d+)?)")
            .unwrap()
            .captures(response)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.5);
        let decision = Regex::new(r"(?i)DECISION:\s*(PROCEED|NEED_INFO|CLARIFY|YES|NO|UNSURE)")
            .unwrap()
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
            .unwrap_or_else(|| "UNSURE".into());
        let info_requests = parse_info_requests(response);
        let action = if (decision == "PROCEED" || decision == "YES")
            && confidence >= cfg.accept_threshold
        {
            MetaAction::Proceed
        } else if decision == "NEED_INFO" {
            MetaAction::NeedInfo {
                requests: info_requests,
            }
        } else if decision == "CLARIFY" || decision == "NO" || confidence < cfg.reject_threshold {
            MetaAction::RequestClarification
        } else {
            MetaAction::NeedsAnalysis
        };
        MetaReflectionResult {
            role: ReflectionRole::Planner,
            confidence,
            action,
            reason: String::new(),
            query_type: None,
            action_verbs: vec![],
            round: 1,
        }
    }

    #[test]
    fn proceed_at_high_confidence() {
        let r = parse("CONFIDENCE: 0.9\nREASON: clear\nDECISION: PROCEED");
        assert!(matches!(r.action, MetaAction::Proceed));
    }

    #[test]
    fn proceed_decision_with_borderline_confidence_is_analysis() {
        let r = parse("CONFIDENCE: 0.6\nREASON: hmm\nDECISION: PROCEED");
        assert!(matches!(r.action, MetaAction::NeedsAnalysis));
    }

    #[test]
    fn low_confidence_forces_clarify() {
        let r = parse("CONFIDENCE: 0.2\nREASON: vague\nDECISION: UNSURE");
        assert!(matches!(r.action, MetaAction::RequestClarification));
    }

    #[test]
    fn need_info_carries_parsed_requests() {
        let response = "CONFIDENCE: 0.6\nREASON: missing prefs\nDECISION: NEED_INFO\n\
                        INFO_REQUESTS:\n- type: memory\n  query: hamster budget\n  reason: needed\n  priority: 2";
        let r = parse(response);
        match r.action {
            MetaAction::NeedInfo { requests } => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].kind, "memory");
                assert_eq!(requests[0].query, "hamster budget");
                assert_eq!(requests[0].priority, 2);
            }
            other => panic!("expected NeedInfo, got {other:?}"),
        }
    }

    #[test]
    fn missing_fields_default_to_analysis() {
        let r = parse("gibberish with no structure");
        assert!((r.confidence - 0.5).abs() < f64::EPSILON);
        assert!(matches!(r.action, MetaAction::NeedsAnalysis));
    }
}
