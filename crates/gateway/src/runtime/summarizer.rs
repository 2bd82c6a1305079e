//! Phase 8 — summarization.
//!
//! Emits `turn_summary.json` (short summary, key findings, learned
//! preferences, topic, satisfaction estimate, next-turn hints) and
//! `memory_writes.json`, then applies the writes to the long-term memory
//! documents and refreshes the live session context. The heuristic path
//! always produces a summary, LLM or no LLM.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::capsule::DistilledCapsule;
use cg_domain::intent::IntentClassification;
use cg_domain::Result;
use cg_sessions::{MemoryDocKind, MemoryWrite, TurnDocs, TurnDirectory};

use crate::runtime::{extract_json, guarded_llm_call, LlmRole};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnSummary {
    pub short_summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub preferences_learned: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    /// Estimated user satisfaction in [0, 1].
    pub satisfaction: f64,
    #[serde(default)]
    pub next_turn_hints: Vec<String>,
}

/// Summarize the turn and persist summary + memory writes.
pub async fn summarize(
    state: &AppState,
    turn: &TurnDirectory,
    query: &str,
    answer: &str,
    capsule: Option<&DistilledCapsule>,
    classification: &IntentClassification,
) -> Result<TurnSummary> {
    let summary = match llm_summary(state, query, answer).await {
        Some(summary) => summary,
        None => heuristic_summary(query, answer, capsule, classification),
    };

    let writes = detect_memory_writes(query, turn.trace_id());
    turn.write_json(TurnDocs::TURN_SUMMARY, &summary)?;
    turn.write_json(TurnDocs::MEMORY_WRITES, &writes)?;

    match state.memory.apply_writes(&writes) {
        Ok(0) => {}
        Ok(n) => tracing::info!(applied = n, "memory writes applied"),
        Err(e) => tracing::warn!(error = %e, "memory writes failed"),
    }

    Ok(summary)
}

async fn llm_summary(state: &AppState, query: &str, answer: &str) -> Option<TurnSummary> {
    let preamble = crate::runtime::role_prompt_preamble(state, "summarizer");
    let prompt = format!(
        "{preamble}You are the Summarizer. Digest this completed turn.\n\n\
         ## Query\n{query}\n\n## Answer\n{answer}\n\n\
         Reply with JSON only:\n\
         {{\"short_summary\": \"<1-2 sentences>\", \"key_findings\": [], \
          \"preferences_learned\": [], \"topic\": \"<short>\", \
          \"satisfaction\": 0.0, \"next_turn_hints\": []}}"
    );
    let response = guarded_llm_call(state, LlmRole::Planner, prompt, 300, 0.3)
        .await
        .map_err(|e| tracing::warn!(error = %e, "summarizer LLM failed; using heuristic"))
        .ok()?;

    let json = extract_json(&response);
    let mut summary: TurnSummary = serde_json::from_value(json).ok()?;
    summary.satisfaction = summary.satisfaction.clamp(0.0, 1.0);
    if summary.short_summary.trim().is_empty() {
        return None;
    }
    Some(summary)
}

/// Always-available fallback: first sentence of the answer, topic from the
/// intent, neutral satisfaction.
fn heuristic_summary(
    query: &str,
    answer: &str,
    capsule: Option<&DistilledCapsule>,
    classification: &IntentClassification,
) -> TurnSummary {
    let first_sentence = answer
        .split(['.', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("turn completed")
        .chars()
        .take(200)
        .collect::<String>();

    let key_findings = capsule
        .map(|c| {
            c.claims
                .iter()
                .take(5)
                .map(|claim| claim.claim.clone())
                .collect()
        })
        .unwrap_or_default();

    TurnSummary {
        short_summary: format!("Asked: {query}. {first_sentence}."),
        key_findings,
        preferences_learned: Vec::new(),
        topic: Some(classification.intent.as_str().to_owned()),
        satisfaction: 0.5,
        next_turn_hints: Vec::new(),
    }
}

/// Keyword-triggered memory-write detection over the user's own words.
fn detect_memory_writes(query: &str, trace_id: &str) -> Vec<MemoryWrite> {
    let lower = query.to_lowercase();
    let mut writes = Vec::new();

    for marker in ["i prefer", "i'd prefer", "i like", "i always", "i never"] {
        if let Some(at) = lower.find(marker) {
            writes.push(MemoryWrite {
                doc_type: MemoryDocKind::UserPreferences,
                section: "Stated Preferences".into(),
                entry: query[at..].chars().take(200).collect(),
                confidence: 0.8,
                source: trace_id.to_owned(),
            });
            break;
        }
    }

    for marker in ["my name is", "i am ", "i'm from", "i live in"] {
        if let Some(at) = lower.find(marker) {
            writes.push(MemoryWrite {
                doc_type: MemoryDocKind::UserFacts,
                section: "Identity".into(),
                entry: query[at..].chars().take(200).collect(),
                confidence: 0.9,
                source: trace_id.to_owned(),
            });
            break;
        }
    }

    for marker in ["my budget", "under $", "under €", "less than $", "at most"] {
        if let Some(at) = lower.find(marker) {
            writes.push(MemoryWrite {
                doc_type: MemoryDocKind::UserPreferences,
                section: "Budget".into(),
                entry: query[at..].chars().take(120).collect(),
                confidence: 0.7,
                source: trace_id.to_owned(),
            });
            break;
        }
    }

    writes
}

/// Fold the finished turn into the live session context.
pub fn update_session(
    state: &AppState,
    session_id: &str,
    query: &str,
    tools_used: Vec<String>,
    summary: &TurnSummary,
    capsule: Option<&DistilledCapsule>,
) {
    let summary_value = serde_json::to_value(summary).unwrap_or(Value::Null);
    let capsule_value = capsule.and_then(|c| serde_json::to_value(c).ok());
    state.sessions.update(session_id, |ctx| {
        ctx.turn_count += 1;
        ctx.record_action(query, tools_used);
        if let Some(topic) = &summary.topic {
            ctx.current_topic = Some(topic.clone());
        }
        for pref in &summary.preferences_learned {
            ctx.preferences
                .insert(format!("learned_{}", ctx.preferences.len()), pref.clone());
        }
        ctx.last_turn_summary = Some(summary_value);
        if capsule_value.is_some() {
            ctx.last_capsule = capsule_value;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::intent::classify;

    #[test]
    fn heuristic_summary_always_present() {
        let classification = classify("find hamster cages");
        let summary = heuristic_summary(
            "find hamster cages",
            "Here are three cages. More detail follows.",
            None,
            &classification,
        );
        assert!(summary.short_summary.contains("find hamster cages"));
        assert!(summary.short_summary.contains("Here are three cages"));
        assert!((summary.satisfaction - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn preference_statement_becomes_memory_write() {
        let writes = detect_memory_writes("I prefer EU-based shops when ordering", "turn-1");
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].doc_type, MemoryDocKind::UserPreferences);
        assert!(writes[0].entry.starts_with("I prefer"));
    }

    #[test]
    fn identity_and_budget_detected_together() {
        let writes =
            detect_memory_writes("my name is Sam and my budget is 200 EUR total", "turn-2");
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn plain_query_produces_no_writes() {
        assert!(detect_memory_writes("find hamster cages", "turn-3").is_empty());
    }
}
