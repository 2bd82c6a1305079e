//! Phase 5 — the agent loop.
//!
//! The executor translates the ticket's goals into natural-language
//! commands; the coordinator turns each command into tool calls; tools run
//! in bounded concurrent batches behind the tool circuit breaker and the
//! tool-output cache. After each batch the results are appended to the
//! context document and the decision is re-solicited.
//!
//! ```text
//! init → decide ──TOOL_CALL──▶ run tools → append results ──▶ decide
//!                    │
//!                    ├──DONE──▶ verify
//!                    └──BLOCKED──▶ verify (with partial evidence)
//!     (step >= max_steps)──▶ BLOCKED
//! ```

use regex::Regex;
use serde_json::Value;

use cg_cache::tool_cache_key;
use cg_domain::bundle::{BundleItemKind, BundleStatus, RawBundle, RawBundleItem, PREVIEW_MAX_CHARS};
use cg_domain::ticket::TaskTicket;
use cg_domain::tool::{ToolCall, ToolOutput};
use cg_domain::{Error, Result};
use cg_sessions::{TurnDocs, TurnDirectory};
use cg_tools::{
    is_approval_required, tool_category, InterventionOutcome, InterventionRequest, InterventionType,
};

use crate::runtime::cancel::CancelToken;
use crate::runtime::{coordinator, guarded_llm_call, LlmRole};
use crate::state::AppState;

/// Tool payloads above this many serialized bytes are stored as artifacts
/// and carried by reference.
const INLINE_PAYLOAD_MAX: usize = 2048;

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Blocked,
    StepCap,
}

#[derive(Debug)]
enum Decision {
    ToolCall { command: String },
    Done,
    Blocked { reason: String },
}

/// Run the agent loop for one ticket, producing the evidence bundle.
pub async fn run_agent_loop(
    state: &AppState,
    turn: &TurnDirectory,
    ticket: &TaskTicket,
    session_id: &str,
    cancel: &CancelToken,
) -> Result<(RawBundle, Terminal)> {
    let max_steps = state.config.pipeline.agent.max_steps;
    let tools_per_step = state.config.pipeline.agent.tools_per_step.max(1);

    let mut bundle = RawBundle::new(&ticket.ticket_id);
    let mut results_log = String::new();
    let mut terminal = Terminal::StepCap;
    // Global call sequence for `tool_calls/step_NN_<tool>.json` naming;
    // distinct from the loop step so two same-named calls never collide.
    let mut call_seq: usize = 0;

    for step in 1..=max_steps {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let decision = decide(state, ticket, &results_log, step, max_steps).await;
        match decision {
            Decision::Done => {
                terminal = Terminal::Done;
                break;
            }
            Decision::Blocked { reason } => {
                tracing::info!(step, reason, "executor blocked");
                bundle
                    .notes
                    .insert("blocked_reason".into(), Value::String(reason));
                terminal = Terminal::Blocked;
                break;
            }
            Decision::ToolCall { command } => {
                let mut planned =
                    coordinator::compose_calls(state, ticket, &command, &results_log).await;
                if planned.plan.is_empty() {
                    // An unplannable command is unrecoverable for this goal.
                    bundle.notes.insert(
                        "blocked_reason".into(),
                        Value::String(format!("coordinator could not plan: {command}")),
                    );
                    terminal = Terminal::Blocked;
                    break;
                }
                planned.plan.truncate(tools_per_step);

                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                // One concurrent batch per step.
                let outputs = futures_util::future::join_all(
                    planned
                        .plan
                        .iter()
                        .map(|call| run_one_tool(state, session_id, call)),
                )
                .await;

                for (index, (call, output)) in planned.plan.iter().zip(outputs).enumerate() {
                    call_seq += 1;
                    let record = serde_json::json!({
                        "step": step,
                        "command": command,
                        "call": call,
                        "output": output,
                    });
                    turn.write_tool_call(call_seq, &call.tool, &record)?;
                    append_result_log(&mut results_log, step, call, &output);
                    let item = bundle_item(state, step, index, call, &output);
                    bundle.items.push(item);
                }

                // Mirror the results into the context document for the next
                // decide round and for later phases.
                sync_tool_section(turn, &results_log)?;
            }
        }
    }

    if bundle.items.is_empty() {
        bundle.status = BundleStatus::Empty;
    }
    if terminal == Terminal::StepCap {
        // Step cap reached without DONE is treated as blocked.
        bundle
            .notes
            .insert("step_cap_reached".into(), Value::Bool(true));
    }
    bundle.validate()?;
    turn.write_json(TurnDocs::BUNDLE, &bundle)?;
    Ok((bundle, terminal))
}

// ── Decide ─────────────────────────────────────────────────────────

async fn decide(
    state: &AppState,
    ticket: &TaskTicket,
    results_log: &str,
    step: usize,
    max_steps: usize,
) -> Decision {
    let micro_plan = ticket.micro_plan.join("\n- ");
    let preamble = crate::runtime::role_prompt_preamble(state, "executor");
    // The running results log grows with every batch; keep it inside the
    // executor's slice of the budget.
    let results_log = state.budget.enforce_limit("executor", results_log, 700);
    let prompt = format!(
        "{preamble}You are the Executor driving tools toward a goal.\n\n\
         Goal: {goal}\n\
         Micro plan:\n- {micro_plan}\n\
         Step {step} of {max_steps}.\n\
         Results so far:\n{results}\n\n\
         Choose exactly one action. Respond ONLY in this format:\n\
         ACTION: [TOOL_CALL or DONE or BLOCKED]\n\
         COMMAND: [natural-language command for the tool expert, only with TOOL_CALL]\n\
         REASON: [one sentence]",
        goal = ticket.goal,
        results = if results_log.is_empty() { "(none yet)" } else { &results_log },
    );

    let response = match guarded_llm_call(state, LlmRole::Coordinator, prompt, 200, 0.2).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "executor decide call failed");
            return Decision::Blocked {
                reason: format!("executor unavailable: {e}"),
            };
        }
    };
    parse_decision(&response, &results_log)
}

fn parse_decision(response: &str, results_log: &str) -> Decision {
    let action = Regex::new(r"(?i)ACTION:\s*(TOOL_CALL|DONE|BLOCKED)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase());

    let command = Regex::new(r"(?i)COMMAND:\s*(.+)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .filter(|c| !c.is_empty());

    match action.as_deref() {
        Some("TOOL_CALL") => match command {
            Some(command) => Decision::ToolCall { command },
            None => Decision::Blocked {
                reason: "TOOL_CALL without a command".into(),
            },
        },
        Some("DONE") => Decision::Done,
        Some("BLOCKED") => Decision::Blocked {
            reason: Regex::new(r"(?i)REASON:\s*(.+)")
                .ok()
                .and_then(|re| re.captures(response))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_owned())
                .unwrap_or_else(|| "executor reported blocked".into()),
        },
        // Unparseable: finish if we already gathered evidence, otherwise
        // give up rather than loop on garbage.
        _ => {
            if results_log.is_empty() {
                Decision::Blocked {
                    reason: "unparseable executor decision".into(),
                }
            } else {
                Decision::Done
            }
        }
    }
}

// ── Tool invocation ────────────────────────────────────────────────

/// One tool call: approval gate → cache → circuit breaker → RPC. Always
/// yields a `ToolOutput`; transport failures become failure outputs after
/// the breaker records them.
async fn run_one_tool(state: &AppState, session_id: &str, call: &ToolCall) -> ToolOutput {
    let category = tool_category(&call.tool).to_owned();

    // Approval-required operations go through the intervention protocol.
    if is_approval_required(&call.tool, &state.config.tools.approval_required) {
        let request = InterventionRequest::new(
            InterventionType::Approval,
            format!("tool://{}", call.tool),
            session_id,
        );
        match state.interventions.request_and_wait(request).await {
            Ok(InterventionOutcome::Resolved { .. }) => {}
            Ok(InterventionOutcome::Unresolved) => {
                return ToolOutput::failed(&call.tool, "approval not granted within timeout");
            }
            Err(e) => {
                return ToolOutput::failed(&call.tool, format!("approval flow failed: {e}"));
            }
        }
    }

    // Cache first: identical invocations within TTL are free.
    if let Some(mut cached) = state.tool_cache.lookup(&call.tool, &call.args) {
        cached
            .metadata
            .insert("cached".into(), Value::Bool(true));
        return cached;
    }

    // Circuit-open: skip with a synthetic failure.
    if state.tool_breaker.check(&category).is_err() {
        tracing::warn!(tool = %call.tool, category, "tool circuit open; skipping call");
        return ToolOutput::circuit_open(&call.tool, &category);
    }

    let result = state
        .tool_breaker
        .call(&category, || async { state.tools.invoke(call).await })
        .await;

    match result {
        Ok(output) => {
            if output.success {
                state
                    .tool_cache
                    .put(&call.tool, &call.args, &output, None)
                    .await;
            } else {
                // HTTP-level tool errors count against the category too.
                state.tool_breaker.record_failure(
                    &category,
                    output.error.as_deref().unwrap_or("tool reported failure"),
                );
            }
            output
        }
        Err(e) => ToolOutput::failed(&call.tool, e.to_string()),
    }
}

// ── Evidence assembly ──────────────────────────────────────────────

fn append_result_log(log: &mut String, step: usize, call: &ToolCall, output: &ToolOutput) {
    let status = if output.success { "ok" } else { "failed" };
    let detail = if output.success {
        summarize_payload(&output.data)
    } else {
        output.error.clone().unwrap_or_else(|| "unknown error".into())
    };
    log.push_str(&format!("- step {step} {} [{status}]: {detail}\n", call.tool));
}

/// Build the bundle item for one output, spilling large payloads to the
/// artifact store.
fn bundle_item(
    state: &AppState,
    step: usize,
    index: usize,
    call: &ToolCall,
    output: &ToolOutput,
) -> RawBundleItem {
    let handle = format!("tool:{step}:{index}:{}", call.tool);
    let serialized = serde_json::to_string(&output.data).unwrap_or_default();

    let (blob_id, preview) = if serialized.len() > INLINE_PAYLOAD_MAX {
        let blob_id = state
            .artifacts
            .store_json(&output.data, "tool_output")
            .map(|record| record.blob_id)
            .map_err(|e| tracing::warn!(error = %e, "artifact store failed for tool output"))
            .ok();
        let preview: String = serialized.chars().take(PREVIEW_MAX_CHARS).collect();
        (blob_id, Some(preview))
    } else {
        (None, Some(serialized.chars().take(PREVIEW_MAX_CHARS).collect()))
    };

    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("tool".to_owned(), Value::String(call.tool.clone()));
    metadata.insert("success".to_owned(), Value::Bool(output.success));
    metadata.insert(
        "cache_key".to_owned(),
        Value::String(tool_cache_key(&call.tool, &call.args)),
    );

    RawBundleItem {
        handle,
        kind: BundleItemKind::ToolOutput,
        summary: Some(summarize_payload(&output.data)),
        blob_id,
        preview,
        metadata,
    }
}

fn summarize_payload(data: &Value) -> String {
    match data {
        Value::String(s) => s.chars().take(160).collect(),
        Value::Array(items) => format!("{} result item(s)", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(6).map(String::as_str).collect();
            format!("object with keys: {}", keys.join(", "))
        }
        Value::Null => "empty result".into(),
        other => other.to_string(),
    }
}

/// Rewrite the `## Tool Execution` section of `context.md` with the running
/// results log.
fn sync_tool_section(turn: &TurnDirectory, results_log: &str) -> Result<()> {
    let context = turn.read_text(TurnDocs::CONTEXT).unwrap_or_default();
    let base = match context.find("\n## Tool Execution\n") {
        Some(at) => context[..at].to_owned(),
        None => context,
    };
    let updated = format!("{base}\n## Tool Execution\n{results_log}");
    turn.write_text(TurnDocs::CONTEXT, &updated)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parsing_variants() {
        assert!(matches!(
            parse_decision("ACTION: TOOL_CALL\nCOMMAND: search for breeders\nREASON: need data", ""),
            Decision::ToolCall { .. }
        ));
        assert!(matches!(parse_decision("ACTION: DONE\nREASON: enough", ""), Decision::Done));
        assert!(matches!(
            parse_decision("ACTION: BLOCKED\nREASON: login wall", ""),
            Decision::Blocked { .. }
        ));
    }

    #[test]
    fn tool_call_without_command_is_blocked() {
        assert!(matches!(
            parse_decision("ACTION: TOOL_CALL\nREASON: oops", ""),
            Decision::Blocked { .. }
        ));
    }

    #[test]
    fn garbage_with_evidence_is_done_without_is_blocked() {
        assert!(matches!(parse_decision("???", "- step 1 web.search [ok]"), Decision::Done));
        assert!(matches!(parse_decision("???", ""), Decision::Blocked { .. }));
    }

    #[test]
    fn payload_summaries() {
        assert_eq!(summarize_payload(&serde_json::json!(["a", "b"])), "2 result item(s)");
        assert_eq!(summarize_payload(&Value::Null), "empty result");
    }
}
