//! Phase 4 — strategic planning.
//!
//! The planner reads `context.md` and the user query and emits a strategic
//! plan with explicit natural-language goals, materialized as a task ticket
//! for the execution tier. Content-type-specialized recipes are tried first
//! when a type is detected; the unspecialized recipe is the default.

use serde_json::Value;
use uuid::Uuid;

use cg_domain::ticket::{Subtask, TaskTicket};
use cg_domain::{Error, Result};
use cg_sessions::{TurnDocs, TurnDirectory};

use crate::runtime::cache_gate::CacheDecision;
use crate::runtime::{extract_json, guarded_llm_call, LlmRole};
use crate::state::AppState;

/// Keyword buckets for content-type recipe specialization.
const ELECTRONICS_MARKERS: &[&str] = &["laptop", "phone", "gpu", "monitor", "headphone", "camera", "tablet"];
const PETS_MARKERS: &[&str] = &["hamster", "dog", "cat", "breeder", "cage", "aquarium", "terrarium", "pet"];

pub fn detect_content_type(query: &str) -> Option<&'static str> {
    let q = query.to_lowercase();
    if ELECTRONICS_MARKERS.iter().any(|m| q.contains(m)) {
        Some("electronics")
    } else if PETS_MARKERS.iter().any(|m| q.contains(m)) {
        Some("pets")
    } else {
        None
    }
}

/// Produce the ticket and persist `plan.json`.
///
/// `BudgetExceeded` from the doc-pack builder is fatal for the phase — it
/// marks a mis-specified recipe and aborts the turn in planning. A missing
/// recipe only drops us to the inline prompt.
pub async fn plan(
    state: &AppState,
    turn: &TurnDirectory,
    query: &str,
    cache_decision: &CacheDecision,
) -> Result<TaskTicket> {
    let content_type = detect_content_type(query);
    let mode = state.config.pipeline.mode.clone();

    let prompt = match state.recipes.select("planner", &mode, content_type) {
        Ok(recipe) => match state.docpack.build(&state.recipes, &recipe, turn.path()) {
            Ok(pack) => Some(pack.as_prompt()),
            Err(e @ Error::BudgetExceeded { .. }) => {
                tracing::error!(error = %e, "planner doc pack over budget; aborting turn");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "planner doc pack failed; using inline prompt");
                None
            }
        },
        Err(e) => {
            tracing::info!(error = %e, "planner recipe unavailable; using inline prompt");
            None
        }
    };

    let prompt = match prompt {
        Some(text) => append_task_footer(text, query, cache_decision),
        None => inline_prompt(turn, query, cache_decision),
    };

    let response = guarded_llm_call(state, LlmRole::Planner, prompt, 800, 0.3).await;
    let ticket = match response {
        Ok(text) => ticket_from_response(&text, turn.trace_id(), query),
        Err(e) => {
            tracing::warn!(error = %e, "planner LLM failed; issuing degraded ticket");
            degraded_ticket(turn.trace_id(), query)
        }
    };

    ticket.validate()?;
    turn.write_json(TurnDocs::PLAN, &ticket)?;
    Ok(ticket)
}

fn plan_instructions(query: &str, cache_decision: &CacheDecision) -> String {
    let retry_note = if cache_decision.is_retry {
        "\nThe user explicitly asked to retry: plan fresh tool executions, never reuse prior results.\n"
    } else {
        ""
    };
    format!(
        "Produce a STRATEGIC_PLAN for the query below.{retry_note}\n\
         Reply with JSON only:\n\
         {{\"goal\": \"<one sentence>\", \"micro_plan\": [\"step\", ...], \
          \"subtasks\": [{{\"id\": \"s1\", \"goal\": \"...\"}}], \
          \"constraints\": {{}}, \"verification\": {{}}, \
          \"return\": {{\"shape\": \"list|comparison|fact|summary\"}}}}\n\n\
         ## User Query\n{query}"
    )
}

fn append_task_footer(pack_prompt: String, query: &str, cache_decision: &CacheDecision) -> String {
    format!("{pack_prompt}\n\n{}", plan_instructions(query, cache_decision))
}

fn inline_prompt(turn: &TurnDirectory, query: &str, cache_decision: &CacheDecision) -> String {
    let context = turn.read_text(TurnDocs::CONTEXT).unwrap_or_default();
    format!(
        "You are the strategic planner of a cognitive gateway.\n\n\
         ## Context\n{context}\n\n{}",
        plan_instructions(query, cache_decision)
    )
}

fn ticket_from_response(response: &str, turn_id: &str, query: &str) -> TaskTicket {
    let json = extract_json(response);
    if json.is_null() {
        return degraded_ticket(turn_id, query);
    }

    let goal = json
        .get("goal")
        .and_then(Value::as_str)
        .filter(|g| !g.trim().is_empty())
        .unwrap_or(query)
        .to_owned();

    let mut ticket = TaskTicket::new(format!("ticket-{}", Uuid::new_v4().simple()), turn_id, goal);

    if let Some(steps) = json.get("micro_plan").and_then(Value::as_array) {
        ticket.micro_plan = steps
            .iter()
            .filter_map(|s| s.as_str().map(str::to_owned))
            .collect();
    }
    if let Some(subtasks) = json.get("subtasks").and_then(Value::as_array) {
        ticket.subtasks = subtasks
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let goal = raw.get("goal").and_then(Value::as_str)?;
                Some(Subtask {
                    id: raw
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| format!("s{}", i + 1)),
                    goal: goal.to_owned(),
                    notes: raw.get("notes").and_then(Value::as_str).map(str::to_owned),
                })
            })
            .collect();
    }
    for (field, target) in [
        ("constraints", &mut ticket.constraints),
        ("verification", &mut ticket.verification),
        ("return", &mut ticket.return_shape),
    ] {
        if let Some(map) = json.get(field).and_then(Value::as_object) {
            *target = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
    }
    ticket
}

/// When planning itself fails, the goal is the query verbatim and the
/// executor gets one shot at it.
fn degraded_ticket(turn_id: &str, query: &str) -> TaskTicket {
    let mut ticket = TaskTicket::new(format!("ticket-{}", Uuid::new_v4().simple()), turn_id, query);
    ticket.micro_plan = vec!["answer the query with available tools".into()];
    ticket
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_detection() {
        assert_eq!(detect_content_type("cheap gaming laptop"), Some("electronics"));
        assert_eq!(detect_content_type("syrian hamster breeders"), Some("pets"));
        assert_eq!(detect_content_type("tax law in portugal"), None);
    }

    #[test]
    fn ticket_parses_structured_plan() {
        let response = r#"{"goal": "find breeders", "micro_plan": ["search", "verify"],
            "subtasks": [{"goal": "search the web"}], "return": {"shape": "list"}}"#;
        let ticket = ticket_from_response(response, "turn-1", "find breeders pls");
        assert_eq!(ticket.goal, "find breeders");
        assert_eq!(ticket.micro_plan.len(), 2);
        assert_eq!(ticket.subtasks[0].id, "s1");
        assert_eq!(ticket.user_turn_id, "turn-1");
    }

    #[test]
    fn garbage_response_degrades_to_query_goal() {
        let ticket = ticket_from_response("no json at all", "turn-1", "find breeders");
        assert_eq!(ticket.goal, "find breeders");
        assert!(!ticket.micro_plan.is_empty());
    }
}
