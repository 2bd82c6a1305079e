//! Phase 7 — synthesis.
//!
//! The synthesizer sees the capsule envelope (never the raw bundle) plus
//! the context document and the user query, and writes `answer.md`. It may
//! only cite claim ids present in the envelope; invented citations are
//! stripped. When the pipeline could not produce grounded material it emits
//! a degraded but honest answer instead of an error.

use cg_domain::capsule::CapsuleEnvelope;
use cg_domain::Result;
use cg_sessions::{TurnDocs, TurnDirectory};

use crate::runtime::{guarded_llm_call, LlmRole};
use crate::state::AppState;

/// Produce `answer.md` from the envelope.
pub async fn synthesize(
    state: &AppState,
    turn: &TurnDirectory,
    envelope: &CapsuleEnvelope,
    query: &str,
) -> Result<String> {
    if envelope.claims_topk.is_empty() {
        // No verified claims. Recall-style queries can still be answered
        // from the context document (prior turn, preferences); only when
        // that fails does the honest degraded answer go out.
        let answer = match from_context_only(state, turn, query).await {
            Some(answer) => answer,
            None => degraded_answer(envelope, query),
        };
        turn.write_text(TurnDocs::ANSWER, &answer)?;
        return Ok(answer);
    }

    let mut claims_block = String::new();
    for id in &envelope.claims_topk {
        if let Some(summary) = envelope.claim_summaries.get(id) {
            claims_block.push_str(&format!("- [{id}] {summary}\n"));
        }
    }
    let caveats = if envelope.caveats.is_empty() {
        "(none)".to_owned()
    } else {
        envelope.caveats.join("; ")
    };
    let context = turn.read_text(TurnDocs::CONTEXT).unwrap_or_default();

    let preamble = crate::runtime::role_prompt_preamble(state, "synthesizer");
    let prompt = format!(
        "{preamble}You are the Synthesizer. Answer the user query using ONLY the \
         verified claims below. Cite claim ids in square brackets; never \
         invent ids that are not listed. Mention caveats when they matter.\n\n\
         ## User Query\n{query}\n\n\
         ## Verified Claims\n{claims_block}\n\
         ## Caveats\n{caveats}\n\n\
         ## Context\n{context}\n\n\
         Write the final answer in markdown:"
    );

    let answer = match guarded_llm_call(state, LlmRole::Planner, prompt, 800, 0.4).await {
        Ok(text) if !text.trim().is_empty() => strip_unknown_citations(&text, envelope),
        Ok(_) => degraded_answer(envelope, query),
        Err(e) => {
            tracing::warn!(error = %e, "synthesizer LLM failed; emitting degraded answer");
            fallback_from_claims(envelope)
        }
    };

    turn.write_text(TurnDocs::ANSWER, &answer)?;
    Ok(answer)
}

/// Answer from the context document alone. Returns `None` when the context
/// has nothing to work with or the LLM is unavailable.
async fn from_context_only(state: &AppState, turn: &TurnDirectory, query: &str) -> Option<String> {
    let context = turn.read_text(TurnDocs::CONTEXT).ok()?;
    // Bare headers and a timestamp footer carry no substance.
    let has_substance = context.lines().any(|l| l.trim_start().starts_with("- ") || l.starts_with("Summary:"));
    if !has_substance {
        return None;
    }

    let prompt = format!(
        "You are the Synthesizer. No fresh evidence was gathered this turn. \
         Answer the user from the session context below if it contains the \
         answer; if it does not, reply with exactly NO_ANSWER.\n\n\
         ## User Query\n{query}\n\n## Context\n{context}\n\nAnswer:"
    );
    match guarded_llm_call(state, LlmRole::Planner, prompt, 600, 0.4).await {
        Ok(text) => {
            let text = text.trim().to_owned();
            if text.is_empty() || text.contains("NO_ANSWER") {
                None
            } else {
                Some(text)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "context-only synthesis failed");
            None
        }
    }
}

/// Remove square-bracket citations whose id is not in the envelope.
fn strip_unknown_citations(text: &str, envelope: &CapsuleEnvelope) -> String {
    let re = regex::Regex::new(r"\[(claim-[0-9a-f]+)\]").expect("static citation pattern");
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let id = &caps[1];
        if envelope.claim_summaries.contains_key(id) {
            caps[0].to_owned()
        } else {
            tracing::debug!(id, "stripping invented claim citation");
            String::new()
        }
    })
    .into_owned()
}

/// No LLM, but claims exist: render them directly.
fn fallback_from_claims(envelope: &CapsuleEnvelope) -> String {
    let mut answer = String::from("Here is what I could verify:\n\n");
    for id in &envelope.claims_topk {
        if let Some(summary) = envelope.claim_summaries.get(id) {
            answer.push_str(&format!("- {summary}\n"));
        }
    }
    if !envelope.caveats.is_empty() {
        answer.push_str(&format!("\nCaveats: {}\n", envelope.caveats.join("; ")));
    }
    answer
}

/// Honest failure answer: one paragraph plus the open questions we would
/// need answered.
fn degraded_answer(envelope: &CapsuleEnvelope, query: &str) -> String {
    let mut answer = format!(
        "I wasn't able to gather grounded evidence for \"{query}\" this time — \
         the sources I rely on were unavailable or returned nothing usable, \
         so I'd rather say so than guess.\n"
    );
    if !envelope.caveats.is_empty() {
        answer.push_str(&format!("\nWhat got in the way: {}\n", envelope.caveats.join("; ")));
    }
    if !envelope.open_questions.is_empty() {
        answer.push_str("\nAnswering these would let me try again:\n");
        for question in &envelope.open_questions {
            answer.push_str(&format!("- {question}\n"));
        }
    }
    answer
}
