//! Phase 1 — context build.
//!
//! Gathers the prior-turn digest, live preferences, recent claims filtered
//! by the query's intent domains, and the long-term memory documents, then
//! composes `context.md` under the configured token cap. Two modes: simple
//! concatenation (default) or LLM-assisted selection via the
//! `context_builder` recipe.

use chrono::Utc;
use serde::Serialize;

use cg_contracts::estimate_tokens;
use cg_domain::capsule::WorkingMemoryCaps;
use cg_domain::claim::ClaimRow;
use cg_domain::intent::IntentClassification;
use cg_domain::Result;
use cg_sessions::{LiveSessionContext, MemoryDocKind, TurnDocs, TurnDirectory};

use crate::runtime::{guarded_llm_call, LlmRole};
use crate::state::AppState;

/// What went into `context.md`, recorded as `context_sources.json`.
#[derive(Debug, Default, Serialize)]
pub struct ContextSources {
    pub prior_turn: bool,
    pub session_preferences: usize,
    pub memory_docs: Vec<String>,
    pub lessons: usize,
    pub claims: usize,
    pub mode: String,
    pub tokens: usize,
}

/// Build `context.md` and `context_sources.json` for this turn.
pub async fn build(
    state: &AppState,
    turn: &TurnDirectory,
    snapshot: &LiveSessionContext,
    intent: &IntentClassification,
    query: &str,
) -> Result<()> {
    let claims = gather_claims(state, snapshot, intent);
    let (content, mut sources) = compose_simple(
        state,
        snapshot,
        &claims,
        state.config.pipeline.context_max_tokens,
    );

    let content = if state.config.pipeline.llm_context_builder {
        match llm_assisted(state, query, &content).await {
            Ok(selected) => {
                sources.mode = "llm".into();
                selected
            }
            Err(e) => {
                tracing::warn!(error = %e, "LLM context builder failed; using simple concatenation");
                content
            }
        }
    } else {
        content
    };

    sources.tokens = estimate_tokens(&content);
    turn.write_text(TurnDocs::CONTEXT, &content)?;
    turn.write_json(TurnDocs::CONTEXT_SOURCES, &sources)?;
    Ok(())
}

fn gather_claims(
    state: &AppState,
    snapshot: &LiveSessionContext,
    intent: &IntentClassification,
) -> Vec<ClaimRow> {
    // The working-memory cap bounds how many registry claims this turn
    // carries; the per-capsule top-k is a separate, tighter limit.
    let caps = WorkingMemoryCaps::default();
    match state
        .claims
        .get_for_session(&snapshot.session_id, None, caps.max_claims)
    {
        Ok(rows) => {
            let domains = intent.intent.cache_domains();
            // Domain filter mirrors the cache isolation rule; claims tagged
            // with a domain outside the intent's set are dropped.
            rows.into_iter()
                .filter(|row| {
                    row.metadata
                        .get("domain")
                        .and_then(|v| v.as_str())
                        .map(|d| domains.contains(&d))
                        .unwrap_or(true)
                })
                .collect()
        }
        Err(e) => {
            tracing::warn!(error = %e, "claim lookup failed during context build");
            Vec::new()
        }
    }
}

/// Simple concatenation with priority order: prior turn → session
/// preferences → user preferences → system knowledge → discovered facts →
/// current claims. Always ends with a timestamp footer.
fn compose_simple(
    state: &AppState,
    snapshot: &LiveSessionContext,
    claims: &[ClaimRow],
    max_tokens: usize,
) -> (String, ContextSources) {
    let mut sections: Vec<String> = vec!["# Context for Current Query\n".into()];
    let mut sources = ContextSources {
        mode: "simple".into(),
        ..ContextSources::default()
    };
    let mut used = 10usize;

    // Prior turn always leads when present.
    if let Some(summary) = &snapshot.last_turn_summary {
        sources.prior_turn = true;
        let mut block = String::from("## Prior Turn\n");
        if let Some(text) = summary.get("short_summary").and_then(|v| v.as_str()) {
            block.push_str(&format!("Summary: {text}\n"));
        }
        if let Some(topic) = summary.get("topic").and_then(|v| v.as_str()) {
            block.push_str(&format!("Topic: {topic}\n"));
        }
        if let Some(findings) = summary.get("key_findings").and_then(|v| v.as_array()) {
            block.push_str("Key findings:\n");
            for finding in findings.iter().take(5) {
                if let Some(text) = finding.as_str() {
                    block.push_str(&format!("- {text}\n"));
                }
            }
        }
        used += estimate_tokens(&block);
        sections.push(block);
    }

    if !snapshot.preferences.is_empty() && used < max_tokens * 3 / 10 {
        sources.session_preferences = snapshot.preferences.len();
        let mut block = String::from("## Session Preferences\n");
        for (key, value) in snapshot.preferences.iter().take(5) {
            block.push_str(&format!("- {key}: {value}\n"));
        }
        used += estimate_tokens(&block);
        sections.push(block);
    }

    // Long-term memory documents: bullet lines only, budget-bounded.
    let memory_budget_stops = [
        (MemoryDocKind::UserPreferences, 4usize),
        (MemoryDocKind::SystemLearnings, 6usize),
        (MemoryDocKind::DomainKnowledge, 7usize),
    ];
    for (kind, tenths) in memory_budget_stops {
        if used >= max_tokens * tenths / 10 {
            continue;
        }
        let Some(content) = state.memory.read_doc(kind) else {
            continue;
        };
        sources.memory_docs.push(kind.file_name().to_owned());
        let title = match kind {
            MemoryDocKind::UserPreferences => "## User Preferences",
            MemoryDocKind::SystemLearnings => "## System Knowledge",
            MemoryDocKind::DomainKnowledge => "## Domain Knowledge",
            MemoryDocKind::UserFacts => "## User Facts",
        };
        let mut block = format!("{title}\n");
        for line in content.lines() {
            if line.starts_with("- ") || line.starts_with("* ") {
                block.push_str(line);
                block.push('\n');
                used += estimate_tokens(line);
                if used > max_tokens * tenths / 10 {
                    break;
                }
            }
        }
        sections.push(block);
    }

    // Lessons: one line each, title plus the first sentence.
    if used < max_tokens * 7 / 10 {
        let lessons = state.memory.read_lessons();
        if !lessons.is_empty() {
            let mut block = String::from("## Lessons\n");
            for (name, content) in lessons.iter().take(5) {
                let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                block.push_str(&format!("- {name}: {first}\n"));
                sources.lessons += 1;
                used += estimate_tokens(first) + 4;
                if used > max_tokens * 7 / 10 {
                    break;
                }
            }
            sections.push(block);
        }
    }

    if !snapshot.discovered_facts.is_empty() && used < max_tokens * 7 / 10 {
        let mut block = String::from("## Discovered Facts\n");
        for (category, facts) in &snapshot.discovered_facts {
            block.push_str(&format!("**{category}:**\n"));
            for fact in facts.iter().take(3) {
                block.push_str(&format!("- {fact}\n"));
                used += estimate_tokens(fact);
            }
        }
        sections.push(block);
    }

    if !claims.is_empty() && used < max_tokens * 9 / 10 {
        let mut block = String::from("## Current Claims\n");
        for claim in claims.iter().take(5) {
            block.push_str(&format!(
                "- {} (confidence: {})\n",
                claim.statement,
                claim.confidence.as_str()
            ));
            sources.claims += 1;
            used += estimate_tokens(&claim.statement) + 10;
            if used > max_tokens * 9 / 10 {
                break;
            }
        }
        sections.push(block);
    }

    sections.push(format!(
        "---\n_Context built: {}_\n",
        Utc::now().to_rfc3339()
    ));
    (sections.join("\n"), sources)
}

/// LLM-assisted selection: hand the candidate context to the model and let
/// it keep what matters for this query.
async fn llm_assisted(state: &AppState, query: &str, candidate: &str) -> Result<String> {
    let max_tokens = state.config.pipeline.context_max_tokens;
    let prompt = format!(
        "You are the context builder. Select from the candidate context only \
         what is relevant to the user query, preserving section headers. \
         Stay under {max_tokens} tokens and keep the timestamp footer.\n\n\
         ## User Query\n{query}\n\n## Candidate Context\n{candidate}"
    );
    let content = guarded_llm_call(state, LlmRole::Planner, prompt, max_tokens as u32, 0.2).await?;
    let trimmed = state.budget.enforce_limit("context_builder", &content, max_tokens);
    Ok(trimmed)
}
