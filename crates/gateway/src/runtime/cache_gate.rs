//! Phase 3 — the cache manager gate.
//!
//! Position in the reflection chain: meta-reflection asks "can I proceed?",
//! this gate asks "can I reuse?", the planner asks "what should I create?".
//!
//! Deterministic fast-bypass rules short-circuit to planning without any
//! LLM call: recall/back-reference queries, explicit retry keywords, low
//! intent confidence, multi-goal queries, and the no-cache-potential case.
//! Only when all of those fail does the ~250-token LLM evaluation run, with
//! a heuristic fallback when the LLM is unavailable.

use serde::{Deserialize, Serialize};

use cg_cache::claims::ClaimCoverage;
use cg_cache::{Freshness, ResponseHit};
use cg_domain::intent::{self, IntentClassification};
use cg_sessions::LiveSessionContext;

use crate::runtime::{extract_json, guarded_llm_call, LlmRole};
use crate::state::AppState;

/// Intent-classifier confidence below which the gate always bypasses.
const MIN_INTENT_CONFIDENCE: f64 = 0.3;
/// Heuristic acceptance floor for a fresh response-cache hit.
const HEURISTIC_MIN_QUALITY: f64 = 0.70;
/// Claim coverage at or above this synthesizes from claims alone.
const CLAIM_COVERAGE_THRESHOLD: f64 = 0.80;

/// Phrases marking a cached response as a failed search; combined with an
/// action verb in the new query they force a fresh run.
const FAILED_SEARCH_INDICATORS: &[&str] = &[
    "couldn't find any",
    "no results found",
    "no offers found",
    "no current listings",
    "no matches found",
    "i couldn't find",
    "i don't see",
    "don't see specific",
    "i don't have specific",
    "0 offer(s) found",
    "0 results",
];

const ACTION_VERBS: &[&str] = &["find", "search", "get", "look for", "show me", "fetch"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    UseResponseCache,
    UseClaims,
    ProceedToPlan,
}

/// The gate's decision, persisted as `cache_decision.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheDecision {
    pub decision: GateDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_source: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    /// Single authoritative retry flag, consumed by the planner.
    #[serde(default)]
    pub is_retry: bool,
}

impl CacheDecision {
    fn proceed(reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            decision: GateDecision::ProceedToPlan,
            cache_source: None,
            reasoning: reasoning.into(),
            confidence,
            is_retry: false,
        }
    }
}

/// Decision plus the cache material it was based on, so the orchestrator
/// can serve a hit without a second lookup.
pub struct GateOutcome {
    pub decision: CacheDecision,
    pub response_hit: Option<ResponseHit>,
    pub claim_coverage: ClaimCoverage,
}

pub async fn evaluate(
    state: &AppState,
    snapshot: &LiveSessionContext,
    classification: &IntentClassification,
    query: &str,
) -> GateOutcome {
    let domains = classification.intent.cache_domains();

    // ── Fast bypass #0: recall / back-reference queries ─────────────
    if intent::is_recall_query(query) {
        tracing::info!("cache gate bypass: recall query is context-dependent");
        return GateOutcome {
            decision: CacheDecision::proceed(
                "Recall query is context-dependent and must not be served from cache",
                0.99,
            ),
            response_hit: None,
            claim_coverage: ClaimCoverage::default(),
        };
    }

    // ── Fast bypass #1: explicit retry keywords ─────────────────────
    if intent::is_retry_query(query) {
        let mut reasoning =
            String::from("User explicitly requested fresh execution (retry/refresh)");
        if let Some(action) = snapshot.last_tool_action() {
            reasoning.push_str(&format!(
                ". Previous query context: '{}' (tools: {})",
                snapshot.current_topic.as_deref().unwrap_or(&action.query),
                action.tools.join(", ")
            ));
        } else if let Some(topic) = &snapshot.current_topic {
            reasoning.push_str(&format!(". Previous query context: '{topic}'"));
        }
        tracing::info!("cache gate bypass: retry keyword detected");
        return GateOutcome {
            decision: CacheDecision {
                decision: GateDecision::ProceedToPlan,
                cache_source: None,
                reasoning,
                confidence: 0.99,
                is_retry: true,
            },
            response_hit: None,
            claim_coverage: ClaimCoverage::default(),
        };
    }

    // ── Fast bypass #2: low-confidence intent ───────────────────────
    if classification.confidence < MIN_INTENT_CONFIDENCE {
        tracing::info!(
            confidence = classification.confidence,
            "cache gate bypass: low intent confidence"
        );
        return GateOutcome {
            decision: CacheDecision::proceed(
                format!(
                    "Intent confidence too low ({:.2})",
                    classification.confidence
                ),
                0.95,
            ),
            response_hit: None,
            claim_coverage: ClaimCoverage::default(),
        };
    }

    // ── Fast bypass #3: multi-goal queries ──────────────────────────
    if classification.multi_goal {
        tracing::info!("cache gate bypass: multi-goal query");
        return GateOutcome {
            decision: CacheDecision::proceed("Multi-goal query requires separate subtasks", 0.95),
            response_hit: None,
            claim_coverage: ClaimCoverage::default(),
        };
    }

    // ── Check all layers ────────────────────────────────────────────
    let response_hit = state
        .response_cache
        .lookup(&snapshot.session_id, query, domains);
    let claim_coverage = state.claim_cache.lookup(query, domains);

    // ── Fast bypass #4: no cache potential ──────────────────────────
    let has_potential = response_hit.as_ref().is_some_and(|h| h.acceptable)
        || !claim_coverage.claims.is_empty();
    if !has_potential {
        tracing::info!("cache gate bypass: no cached data available");
        return GateOutcome {
            decision: CacheDecision::proceed("No cached data available", 0.95),
            response_hit: None,
            claim_coverage,
        };
    }

    // ── LLM evaluation, heuristic fallback ──────────────────────────
    let decision = match llm_decision(state, snapshot, classification, query, &response_hit, &claim_coverage)
        .await
    {
        Some(decision) => decision,
        None => heuristic_decision(query, &response_hit, &claim_coverage),
    };

    // Failed-search guard applies to any response-cache acceptance.
    let decision = if decision.decision == GateDecision::UseResponseCache
        && response_hit
            .as_ref()
            .is_some_and(|hit| is_failed_search(&hit.response.answer))
        && has_action_verb(query)
    {
        tracing::info!("cache gate: action query over failed cached search; bypassing");
        CacheDecision::proceed(
            "Action query with failed cached search - performing fresh search",
            0.90,
        )
    } else {
        decision
    };

    GateOutcome {
        decision,
        response_hit,
        claim_coverage,
    }
}

fn is_failed_search(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    FAILED_SEARCH_INDICATORS.iter().any(|p| lower.contains(p))
}

fn has_action_verb(query: &str) -> bool {
    let lower = query.to_lowercase();
    ACTION_VERBS.iter().any(|v| lower.contains(v))
}

async fn llm_decision(
    state: &AppState,
    snapshot: &LiveSessionContext,
    classification: &IntentClassification,
    query: &str,
    response_hit: &Option<ResponseHit>,
    coverage: &ClaimCoverage,
) -> Option<CacheDecision> {
    let response_status = match response_hit {
        Some(hit) => format!(
            "- Match: \"{}\"\n- Hybrid score: {:.2}\n- Age: {:.1}h / TTL: {:.1}h ({})\n- Quality: {:.2}",
            hit.response.query.chars().take(60).collect::<String>(),
            hit.hybrid_score,
            hit.entry.age_seconds(chrono::Utc::now()) as f64 / 3600.0,
            hit.entry.ttl_seconds as f64 / 3600.0,
            if hit.freshness == Freshness::Fresh { "FRESH" } else { "STALE" },
            hit.entry.quality_score,
        ),
        None => "- No match".to_owned(),
    };
    let claims_status = if coverage.claims.is_empty() {
        "- No claims".to_owned()
    } else {
        format!(
            "- Coverage: {:.2} (>0.80 = high)\n- Claims: {} relevant claims",
            coverage.coverage_score,
            coverage.claims.len()
        )
    };

    let prompt = format!(
        "You are the Cache Manager. Decide if cached data can satisfy the user's request.\n\n\
         ## User Query\n\"{query}\"\n\n\
         ## Session Context\n- Intent: {intent}\n- Preferences stored: {prefs}\n\n\
         ## Cache Status\n\n**Layer 1: Response Cache (session-scoped)**\n{response_status}\n\n\
         **Layer 2: Claims Registry (shared)**\n{claims_status}\n\n\
         ## Decision\n\
         Evaluate: semantic match, freshness, quality vs staleness trade-off, intent alignment.\n\
         Reply with JSON only:\n\
         {{\"decision\": \"use_response_cache|use_claims|proceed_to_plan\", \
          \"cache_source\": \"response|claims|none\", \
          \"reasoning\": \"<1 sentence>\", \"confidence\": 0.0}}",
        intent = classification.intent.as_str(),
        prefs = snapshot.preferences.len(),
    );

    let max_tokens = state.config.pipeline.cache_gate_max_tokens as u32;
    let response = match guarded_llm_call(state, LlmRole::Planner, prompt, max_tokens, 0.2).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "cache gate LLM call failed; using heuristic");
            return None;
        }
    };

    let json = extract_json(&response);
    let decision = match json.get("decision").and_then(|v| v.as_str()) {
        Some("use_response_cache") => GateDecision::UseResponseCache,
        Some("use_claims") => GateDecision::UseClaims,
        Some("proceed_to_plan") => GateDecision::ProceedToPlan,
        _ => return None,
    };
    Some(CacheDecision {
        decision,
        cache_source: json
            .get("cache_source")
            .and_then(|v| v.as_str())
            .filter(|s| *s != "none")
            .map(str::to_owned),
        reasoning: json
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("LLM cache evaluation")
            .to_owned(),
        confidence: json
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.7)
            .clamp(0.0, 1.0),
        is_retry: false,
    })
}

/// Heuristic fallback: fresh + quality ⇒ response; high coverage ⇒ claims;
/// otherwise plan.
fn heuristic_decision(
    query: &str,
    response_hit: &Option<ResponseHit>,
    coverage: &ClaimCoverage,
) -> CacheDecision {
    if let Some(hit) = response_hit {
        let fresh = hit.freshness == Freshness::Fresh;
        let quality_ok = hit.entry.quality_score >= HEURISTIC_MIN_QUALITY;
        if (fresh && quality_ok) || (!fresh && hit.acceptable) {
            if is_failed_search(&hit.response.answer) && has_action_verb(query) {
                return CacheDecision::proceed(
                    "Action query with failed cached search - performing fresh search",
                    0.90,
                );
            }
            return CacheDecision {
                decision: GateDecision::UseResponseCache,
                cache_source: Some("response".into()),
                reasoning: format!(
                    "Fresh cache hit with quality {:.2}",
                    hit.entry.quality_score
                ),
                confidence: 0.85,
                is_retry: false,
            };
        }
    }

    if coverage.coverage_score >= CLAIM_COVERAGE_THRESHOLD {
        return CacheDecision {
            decision: GateDecision::UseClaims,
            cache_source: Some("claims".into()),
            reasoning: format!("High claims coverage ({:.2})", coverage.coverage_score),
            confidence: 0.75,
            is_retry: false,
        };
    }

    CacheDecision::proceed("Insufficient cache data", 0.70)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_search_detection() {
        assert!(is_failed_search("Sorry, I couldn't find any breeders."));
        assert!(!is_failed_search("Here are three breeders."));
    }

    #[test]
    fn heuristic_falls_through_to_plan_without_material() {
        let d = heuristic_decision("find cages", &None, &ClaimCoverage::default());
        assert_eq!(d.decision, GateDecision::ProceedToPlan);
    }

    #[test]
    fn heuristic_uses_claims_on_high_coverage() {
        let coverage = ClaimCoverage {
            claims: vec![],
            coverage_score: 0.9,
        };
        let d = heuristic_decision("find cages", &None, &coverage);
        assert_eq!(d.decision, GateDecision::UseClaims);
    }
}
