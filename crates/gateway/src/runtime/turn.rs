//! The turn orchestrator — drives one user turn through the eight-phase
//! pipeline, with cancellation checks at every suspension point, ledger
//! events for each lifecycle transition, and a sealed turn directory at
//! the end. Callers always receive an answer document, never a bare error.

use serde_json::Value;

use cg_cache::CachedResponse;
use cg_domain::bundle::BundleStatus;
use cg_domain::capsule::CapsuleEnvelope;
use cg_domain::intent::{self, IntentClassification, QueryIntent};
use cg_domain::reflect::{InfoRequest, MetaAction, MetaReflectionResult, ReflectionRole};
use cg_domain::{Error, Result};
use cg_sessions::{LedgerEvent, LiveSessionContext, MemoryDocKind, TurnDocs, TurnDirectory};

use crate::runtime::cache_gate::{self, GateDecision};
use crate::runtime::cancel::CancelToken;
use crate::runtime::{
    context_builder, executor, planner, reflection, summarizer, synthesizer, verifier,
};
use crate::state::AppState;

/// One inbound turn request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub query: String,
}

/// What the HTTP layer returns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnOutcome {
    pub trace_id: String,
    pub answer: String,
    /// completed | clarification | cached | aborted
    pub status: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

/// Run one full turn. The per-session lock is held for the duration; a
/// second request on the same session queues behind this one.
pub async fn run_turn(state: &AppState, request: TurnRequest) -> Result<TurnOutcome> {
    let _permit = state.session_locks.acquire(&request.session_id).await?;
    let cancel = state.cancel_map.register(&request.session_id);

    let result = run_turn_inner(state, &request, &cancel).await;
    state.cancel_map.remove(&request.session_id);

    match result {
        Ok(outcome) => Ok(outcome),
        Err(Error::Cancelled) => Ok(TurnOutcome {
            trace_id: String::new(),
            answer: "The turn was cancelled before completion.".into(),
            status: "aborted".into(),
            cached: false,
            clarification: None,
        }),
        Err(e) => Err(e),
    }
}

async fn run_turn_inner(
    state: &AppState,
    request: &TurnRequest,
    cancel: &CancelToken,
) -> Result<TurnOutcome> {
    let session_id = &request.session_id;
    let query = request.query.trim();

    // ── Turn directory + intake documents ───────────────────────────
    let turn = TurnDirectory::allocate(&state.config.paths.transcripts_dir)?;
    let trace_id = turn.trace_id().to_owned();
    state.ledger.append(
        session_id,
        LedgerEvent::new("turn_started", &trace_id)
            .with_detail(serde_json::json!({"query": query})),
    )?;

    turn.write_text(TurnDocs::USER_QUERY, query)?;
    let classification = intent::classify(query);
    turn.write_json(TurnDocs::INTENT, &classification)?;
    let snapshot = state.sessions.snapshot(session_id);

    tracing::info!(
        trace_id,
        session_id,
        intent = classification.intent.as_str(),
        confidence = classification.confidence,
        "turn started"
    );

    // ── Phase 1: context build ──────────────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    context_builder::build(state, &turn, &snapshot, &classification, query).await?;

    // ── Phase 2: meta-reflection (bounded info-fetch loop) ──────────
    check_cancel(cancel, &turn, session_id, state)?;
    let mut info_budget = InfoBudget::new(&state.config.pipeline.reflection);
    let mut reflections: Vec<MetaReflectionResult> = Vec::new();
    let reflection_outcome = reflect_with_info_loop(
        state,
        &turn,
        &snapshot,
        ReflectionRole::Planner,
        query,
        &mut info_budget,
        &mut reflections,
    )
    .await?;
    if let Some(clarification) = reflection_outcome {
        // Persistent CLARIFY short-circuits with a question, still sealed.
        let answer = format!(
            "Before I can help with that, one question: {clarification}"
        );
        turn.write_text(TurnDocs::ANSWER, &answer)?;
        finish_turn(state, session_id, &turn, "clarification")?;
        return Ok(TurnOutcome {
            trace_id,
            answer,
            status: "clarification".into(),
            cached: false,
            clarification: Some(clarification),
        });
    }

    // ── Phase 3: cache manager gate ─────────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    let gate = cache_gate::evaluate(state, &snapshot, &classification, query).await;
    turn.write_json(TurnDocs::CACHE_DECISION, &gate.decision)?;
    state.ledger.append(
        session_id,
        LedgerEvent::new("cache_decision", &trace_id)
            .with_detail(serde_json::to_value(&gate.decision)?),
    )?;

    match gate.decision.decision {
        GateDecision::UseResponseCache => {
            if let Some(hit) = &gate.response_hit {
                tracing::info!(trace_id, score = hit.hybrid_score, "serving from response cache");
                let answer = hit.response.answer.clone();
                turn.write_text(TurnDocs::ANSWER, &answer)?;
                for claim_id in &hit.response.claim_ids {
                    let _ = state.claims.mark_reused(claim_id, true);
                }
                let summary = finalize_summary(state, &turn, query, &answer, None, &classification).await?;
                summarizer::update_session(state, session_id, query, Vec::new(), &summary, None);
                finish_turn(state, session_id, &turn, "cached")?;
                return Ok(TurnOutcome {
                    trace_id,
                    answer,
                    status: "cached".into(),
                    cached: true,
                    clarification: None,
                });
            }
            // Decision said cache but the hit evaporated: fall through.
            tracing::warn!("cache decision without a usable hit; proceeding to plan");
        }
        GateDecision::UseClaims => {
            let envelope = envelope_from_claims(&trace_id, &gate.claim_coverage);
            if !envelope.claims_topk.is_empty() {
                tracing::info!(
                    trace_id,
                    claims = envelope.claims_topk.len(),
                    "synthesizing from cached claims"
                );
                for id in &envelope.claims_topk {
                    let _ = state.claims.mark_reused(id, true);
                }
                let answer = synthesizer::synthesize(state, &turn, &envelope, query).await?;
                let summary = finalize_summary(state, &turn, query, &answer, None, &classification).await?;
                summarizer::update_session(state, session_id, query, Vec::new(), &summary, None);
                maybe_cache_response(state, session_id, &classification, query, &answer, &envelope).await;
                finish_turn(state, session_id, &turn, "completed")?;
                return Ok(TurnOutcome {
                    trace_id,
                    answer,
                    status: "completed".into(),
                    cached: true,
                    clarification: None,
                });
            }
            tracing::warn!("use_claims decision with no claims; proceeding to plan");
        }
        GateDecision::ProceedToPlan => {}
    }

    // ── Phase 4: planning ───────────────────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    let ticket = match planner::plan(state, &turn, query, &gate.decision).await {
        Ok(ticket) => ticket,
        Err(e @ Error::BudgetExceeded { .. }) => {
            // Mis-specified recipe: fatal for the phase, turn aborts with a
            // recorded failure and an honest answer.
            state.ledger.append(
                session_id,
                LedgerEvent::new("turn_aborted", &trace_id)
                    .with_detail(serde_json::json!({"reason": e.to_string()})),
            )?;
            let answer = "I hit an internal configuration limit while planning \
                          this request and had to stop. Please try again, or \
                          simplify the question."
                .to_owned();
            turn.write_text(TurnDocs::ANSWER, &answer)?;
            turn.seal("aborted")?;
            return Ok(TurnOutcome {
                trace_id,
                answer,
                status: "aborted".into(),
                cached: false,
                clarification: None,
            });
        }
        Err(e) => return Err(e),
    };
    state.ledger.append(
        session_id,
        LedgerEvent::new("ticket_issued", &trace_id)
            .with_detail(serde_json::json!({"ticket_id": ticket.ticket_id, "goal": ticket.goal})),
    )?;

    // ── Phase 5: execution (agent loop) ─────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    // Nested coordinator gate: "can I execute this plan?".
    let _ = reflect_with_info_loop(
        state,
        &turn,
        &snapshot,
        ReflectionRole::Coordinator,
        &ticket.goal,
        &mut info_budget,
        &mut reflections,
    )
    .await?;
    let (bundle, terminal) =
        executor::run_agent_loop(state, &turn, &ticket, session_id, cancel).await?;
    state.ledger.append(
        session_id,
        LedgerEvent::new("bundle_ready", &trace_id).with_detail(serde_json::json!({
            "items": bundle.items.len(),
            "terminal": format!("{terminal:?}"),
        })),
    )?;
    let tools_used: Vec<String> = bundle
        .items
        .iter()
        .filter_map(|i| i.metadata.get("tool").and_then(Value::as_str).map(str::to_owned))
        .collect();

    // ── Phase 6: verification ───────────────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    // Nested verifier gate: "is the evidence sufficient?". Skipped for an
    // empty bundle — there is nothing to evaluate.
    if !bundle.items.is_empty() {
        let evidence_summary = format!(
            "{} evidence item(s) for goal: {}",
            bundle.items.len(),
            ticket.goal
        );
        let _ = reflect_with_info_loop(
            state,
            &turn,
            &snapshot,
            ReflectionRole::Verifier,
            &evidence_summary,
            &mut info_budget,
            &mut reflections,
        )
        .await?;
    }
    let (capsule, envelope) = verifier::distill(
        state,
        &turn,
        &bundle,
        session_id,
        classification.intent,
        query,
        snapshot.last_capsule.as_ref(),
    )
    .await?;
    state.ledger.append(
        session_id,
        LedgerEvent::new("capsule_ready", &trace_id)
            .with_detail(serde_json::json!({"claims": capsule.claims.len()})),
    )?;

    // ── Phase 7: synthesis ──────────────────────────────────────────
    check_cancel(cancel, &turn, session_id, state)?;
    let answer = synthesizer::synthesize(state, &turn, &envelope, query).await?;

    // ── Phase 8: summarization + session/caches update ──────────────
    let summary =
        finalize_summary(state, &turn, query, &answer, Some(&capsule), &classification).await?;
    summarizer::update_session(
        state,
        session_id,
        query,
        tools_used,
        &summary,
        Some(&capsule),
    );
    if terminal == executor::Terminal::Done && !envelope.claims_topk.is_empty() {
        maybe_cache_response(state, session_id, &classification, query, &answer, &envelope).await;
    }

    finish_turn(state, session_id, &turn, "completed")?;
    Ok(TurnOutcome {
        trace_id,
        answer,
        status: "completed".into(),
        cached: false,
        clarification: None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reflection loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks the per-turn info-fetch allowance across nested reflection gates.
/// `shared_budget` draws every role from one pool; `per_role_budget` gives
/// each role its own.
struct InfoBudget {
    mode: cg_domain::config::ReflectionBudgetMode,
    max_rounds: u8,
    used_total: u8,
    used_by_role: std::collections::HashMap<&'static str, u8>,
}

impl InfoBudget {
    fn new(config: &cg_domain::config::ReflectionConfig) -> Self {
        Self {
            mode: config.budget_mode,
            max_rounds: config.max_info_rounds,
            used_total: 0,
            used_by_role: std::collections::HashMap::new(),
        }
    }

    fn try_consume(&mut self, role: ReflectionRole) -> bool {
        use cg_domain::config::ReflectionBudgetMode;
        match self.mode {
            ReflectionBudgetMode::SharedBudget => {
                if self.used_total >= self.max_rounds {
                    return false;
                }
                self.used_total += 1;
                true
            }
            ReflectionBudgetMode::PerRoleBudget => {
                let used = self.used_by_role.entry(role.as_str()).or_insert(0);
                if *used >= self.max_rounds {
                    return false;
                }
                *used += 1;
                true
            }
        }
    }
}

/// Run one role's reflection gate with the bounded info-fetch loop.
///
/// For the planner role a persistent CLARIFY short-circuits the pipeline
/// (`Some(question)` is returned). For the nested coordinator/verifier
/// gates a CLARIFY mid-pipeline degrades instead of aborting — partial
/// material already exists — and is recorded in the reflection document.
async fn reflect_with_info_loop(
    state: &AppState,
    turn: &TurnDirectory,
    snapshot: &LiveSessionContext,
    role: ReflectionRole,
    input: &str,
    budget: &mut InfoBudget,
    results: &mut Vec<MetaReflectionResult>,
) -> Result<Option<String>> {
    let mut live_context = turn.read_text(TurnDocs::CONTEXT).unwrap_or_default();

    let mut round: u8 = 1;
    loop {
        let result =
            reflection::can_i_proceed(state, role, input, &live_context, round).await;
        let action = result.action.clone();
        results.push(result);

        match action {
            MetaAction::Proceed | MetaAction::NeedsAnalysis => break,
            MetaAction::RequestClarification => {
                turn.write_text(TurnDocs::META_REFLECTION, &reflection::render_document(results))?;
                if role == ReflectionRole::Planner {
                    return Ok(Some(clarifying_question(input)));
                }
                // Nested gates degrade rather than abort.
                tracing::warn!(role = role.as_str(), "nested gate asked to clarify; degrading");
                break;
            }
            MetaAction::NeedInfo { requests } => {
                if !budget.try_consume(role) {
                    // Budget exhausted: proceed with what we have.
                    break;
                }
                let fetched = fetch_info(state, snapshot, &requests);
                if fetched.is_empty() {
                    break;
                }
                live_context.push_str("\n\n## Information from Previous Rounds\n");
                live_context.push_str(&fetched);
                turn.write_text(TurnDocs::CONTEXT, &live_context)?;
                round += 1;
            }
        }
    }

    turn.write_text(TurnDocs::META_REFLECTION, &reflection::render_document(results))?;
    Ok(None)
}

/// Serve NEED_INFO requests locally: claim registry lookups and memory
/// document scans. Quick tool fetches are out of scope for the gate — the
/// agent loop owns tool access.
fn fetch_info(
    state: &AppState,
    snapshot: &LiveSessionContext,
    requests: &[InfoRequest],
) -> String {
    let mut out = String::new();
    for request in requests.iter().take(3) {
        match request.kind.as_str() {
            "claims" | "memory" => {
                if let Ok(rows) = state.claims.get_for_session(&snapshot.session_id, None, 5) {
                    let tokens = cg_state::tokenize(&request.query);
                    for row in rows {
                        let statement_tokens = cg_state::tokenize(&row.statement);
                        if tokens.iter().any(|t| statement_tokens.contains(t)) {
                            out.push_str(&format!("- (claim) {}\n", row.statement));
                        }
                    }
                }
                if request.kind == "memory" {
                    for kind in [MemoryDocKind::UserPreferences, MemoryDocKind::UserFacts] {
                        if let Some(content) = state.memory.read_doc(kind) {
                            let needle = request.query.to_lowercase();
                            for line in content.lines().filter(|l| l.starts_with("- ")) {
                                if line_matches(line, &needle) {
                                    out.push_str(&format!("- (memory) {}\n", line.trim_start_matches("- ")));
                                }
                            }
                        }
                    }
                }
            }
            other => {
                tracing::debug!(kind = other, "unsupported info request kind");
            }
        }
    }
    out
}

fn line_matches(line: &str, needle: &str) -> bool {
    needle
        .split_whitespace()
        .any(|word| line.to_lowercase().contains(word))
}

fn clarifying_question(query: &str) -> String {
    format!(
        "could you say a bit more about what you're after with \"{}\" — \
         for example the specific item, region, or budget?",
        query.chars().take(120).collect::<String>()
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_cancel(
    cancel: &CancelToken,
    turn: &TurnDirectory,
    session_id: &str,
    state: &AppState,
) -> Result<()> {
    if cancel.is_cancelled() {
        // Already-written documents remain valid partial state.
        let _ = state.ledger.append(
            session_id,
            LedgerEvent::new("turn_aborted", turn.trace_id())
                .with_detail(serde_json::json!({"reason": "cancelled"})),
        );
        let _ = turn.seal("aborted");
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn finalize_summary(
    state: &AppState,
    turn: &TurnDirectory,
    query: &str,
    answer: &str,
    capsule: Option<&cg_domain::capsule::DistilledCapsule>,
    classification: &IntentClassification,
) -> Result<summarizer::TurnSummary> {
    summarizer::summarize(state, turn, query, answer, capsule, classification).await
}

fn finish_turn(
    state: &AppState,
    session_id: &str,
    turn: &TurnDirectory,
    status: &str,
) -> Result<()> {
    turn.seal(status)?;
    state.ledger.append(
        session_id,
        LedgerEvent::new("turn_sealed", turn.trace_id())
            .with_detail(serde_json::json!({"status": status})),
    )?;
    Ok(())
}

/// Build a synthesizer envelope directly from cached claim coverage.
fn envelope_from_claims(
    trace_id: &str,
    coverage: &cg_cache::claims::ClaimCoverage,
) -> CapsuleEnvelope {
    let mut envelope = CapsuleEnvelope::empty(trace_id, BundleStatus::Ok);
    for claim in &coverage.claims {
        envelope
            .claim_summaries
            .insert(claim.claim_id.clone(), claim.statement.clone());
        envelope.claims_topk.push(claim.claim_id.clone());
    }
    envelope.delta = false;
    envelope
}

/// Cache the final answer when it is eligible: a confident single-goal
/// answer that is not itself a recall/retry and actually carries claims.
async fn maybe_cache_response(
    state: &AppState,
    session_id: &str,
    classification: &IntentClassification,
    query: &str,
    answer: &str,
    envelope: &CapsuleEnvelope,
) {
    let ineligible = classification.multi_goal
        || matches!(classification.intent, QueryIntent::Recall | QueryIntent::Retry)
        || envelope.claims_topk.is_empty();
    if ineligible {
        return;
    }

    let domain = classification
        .intent
        .cache_domains()
        .first()
        .copied()
        .unwrap_or("general");

    // Quality blends claim count and gate confidence into [0, 1].
    let quality = (0.5 + 0.1 * envelope.claims_topk.len() as f64).min(0.95);

    state
        .response_cache
        .put(
            session_id,
            domain,
            CachedResponse {
                query: query.to_owned(),
                answer: answer.to_owned(),
                intent: classification.intent.as_str().to_owned(),
                claim_ids: envelope.claims_topk.clone(),
            },
            quality,
        )
        .await;
    tracing::debug!(domain, quality, "response cached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::claim::claim_id_for;

    #[test]
    fn envelope_from_claims_maps_ids() {
        let mut coverage = cg_cache::claims::ClaimCoverage::default();
        let mut row = cg_domain::claim::ClaimRow::new(
            "s1",
            cg_domain::claim::ClaimType::Retailer,
            "ShopA sells cages",
        );
        row.claim_id = claim_id_for("ShopA sells cages");
        coverage.claims.push(row);

        let envelope = envelope_from_claims("t-1", &coverage);
        assert_eq!(envelope.claims_topk.len(), 1);
        assert!(envelope
            .claim_summaries
            .values()
            .any(|s| s.contains("ShopA")));
    }

    #[test]
    fn clarifying_question_embeds_query() {
        let q = clarifying_question("find stuff");
        assert!(q.contains("find stuff"));
    }
}
