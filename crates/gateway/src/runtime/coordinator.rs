//! The coordinator tier: translates an executor command into concrete tool
//! calls. Output passes through the contract enforcer — an empty plan
//! signals failure without ever raising.

use cg_contracts::PlannedCalls;
use cg_domain::ticket::TaskTicket;
use cg_tools::known_tools;

use crate::runtime::{extract_json, guarded_llm_call, LlmRole};
use crate::state::AppState;

/// Compose tool calls for one natural-language command.
pub async fn compose_calls(
    state: &AppState,
    ticket: &TaskTicket,
    command: &str,
    results_so_far: &str,
) -> PlannedCalls {
    let tools = known_tools().join(", ");
    let constraints = serde_json::to_string(&ticket.constraints).unwrap_or_else(|_| "{}".into());
    let preamble = crate::runtime::role_prompt_preamble(state, "coordinator");
    let prompt = format!(
        "{preamble}You are the Coordinator, the tool expert. Translate the command into \
         concrete tool calls.\n\n\
         Available tools: {tools}\n\
         Ticket goal: {goal}\n\
         Constraints: {constraints}\n\
         Command: {command}\n\
         Results so far:\n{results}\n\n\
         Reply with JSON only:\n\
         {{\"plan\": [{{\"tool\": \"web.search\", \"args\": {{\"query\": \"...\"}}, \"required\": true}}], \
          \"reflection\": \"<short>\", \"confidence\": 0.0}}",
        goal = ticket.goal,
        results = if results_so_far.is_empty() { "(none)" } else { results_so_far },
    );

    match guarded_llm_call(state, LlmRole::Coordinator, prompt, 600, 0.2).await {
        Ok(response) => {
            let parsed = state.enforcer.parse_coordinator_response(&extract_json(&response));
            if parsed.plan.is_empty() {
                tracing::warn!(command, "coordinator produced an empty plan");
            }
            parsed
        }
        Err(e) => {
            tracing::warn!(error = %e, "coordinator LLM failed; empty plan");
            PlannedCalls::default()
        }
    }
}
