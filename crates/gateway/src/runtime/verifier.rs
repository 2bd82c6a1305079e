//! Phase 6 — verification.
//!
//! The verifier distills the raw bundle into an evidence-backed capsule:
//! ranked claims, caveats, open questions, and a budget report. Claim ids
//! are stable content hashes so equal claims dedup; every surviving claim's
//! evidence handles must resolve in this turn's bundle. Verified claims are
//! promoted to the claim registry and the claim cache.
//!
//! The capsule→envelope ranking policy is pluggable via [`ClaimRanker`];
//! the default orders by confidence and recency.

use chrono::Utc;
use serde_json::Value;

use cg_domain::bundle::{BundleStatus, RawBundle};
use cg_domain::capsule::{
    CapsuleArtifact, CapsuleClaim, CapsuleEnvelope, DistilledCapsule, WorkingMemoryCaps,
};
use cg_domain::claim::{claim_id_for, ClaimRow, ClaimType, Confidence};
use cg_domain::intent::QueryIntent;
use cg_domain::Result;
use cg_knowledge::compute_delta;
use cg_sessions::{TurnDocs, TurnDirectory};

use crate::runtime::{extract_json, guarded_llm_call, LlmRole};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ranking policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Orders capsule claims for the envelope's top-k selection.
pub trait ClaimRanker: Send + Sync {
    fn rank(&self, claims: &mut Vec<CapsuleClaim>);
}

/// Default policy: confidence first, then recency.
pub struct QualityRanker;

impl ClaimRanker for QualityRanker {
    fn rank(&self, claims: &mut Vec<CapsuleClaim>) {
        claims.sort_by(|a, b| {
            confidence_weight(b.confidence)
                .partial_cmp(&confidence_weight(a.confidence))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_verified.cmp(&a.last_verified))
        });
    }
}

fn confidence_weight(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::High => 1.0,
        Confidence::Medium => 0.6,
        Confidence::Low => 0.3,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Distillation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Distill the bundle into a capsule + envelope, promote verified claims,
/// and persist `capsule.json`.
pub async fn distill(
    state: &AppState,
    turn: &TurnDirectory,
    bundle: &RawBundle,
    session_id: &str,
    intent: QueryIntent,
    query: &str,
    prior_capsule: Option<&Value>,
) -> Result<(DistilledCapsule, CapsuleEnvelope)> {
    let caps = WorkingMemoryCaps::default();

    let mut capsule = if bundle.items.is_empty() {
        let mut empty = DistilledCapsule::new(&bundle.ticket_id);
        empty.status = BundleStatus::Empty;
        empty
            .caveats
            .push("no evidence was gathered during execution".into());
        empty
    } else {
        match llm_distill(state, bundle, query).await {
            Some(capsule) => capsule,
            None => heuristic_capsule(bundle),
        }
    };

    // Contract: evidence handles must resolve to bundle items of this turn.
    let before = capsule.claims.len();
    capsule.claims.retain(|claim| {
        claim.validate().is_ok() && claim.evidence.iter().all(|h| bundle.item(h).is_some())
    });
    let dropped = before - capsule.claims.len();
    if dropped > 0 {
        state.monitor.record(
            "verifier",
            "CapsuleClaim",
            &format!("{dropped} claim(s) cited unresolvable evidence"),
            &Value::Null,
            true,
            Some("item_drop"),
        );
    }

    // Stable ids + verification stamps.
    let now = Utc::now();
    for claim in &mut capsule.claims {
        claim.claim_id = Some(claim_id_for(&claim.claim));
        claim.last_verified.get_or_insert(now);
    }

    // Rank and cap.
    let ranker = QualityRanker;
    ranker.rank(&mut capsule.claims);
    capsule.claims.truncate(caps.capsule_claim_limit);
    capsule.open_questions.truncate(caps.max_open_questions);
    capsule.artifacts.truncate(caps.max_artifacts);

    capsule.budget_report.insert(
        "claims".into(),
        serde_json::json!({"kept": capsule.claims.len(), "dropped_invalid": dropped}),
    );

    // Promote verified claims to the registry and the claim cache.
    promote_claims(state, &capsule, session_id, intent).await;

    // Delta vs the prior turn's capsule: only new/refreshed claims reach
    // the synthesizer when working memory already covers the rest.
    let prior: Option<DistilledCapsule> =
        prior_capsule.and_then(|v| serde_json::from_value(v.clone()).ok());
    let mut envelope = build_envelope(&capsule, prior.as_ref());

    if dropped > 0 {
        let total = before as u32;
        envelope.quality_report = Some(cg_domain::capsule::QualityReport {
            total_fetched: total,
            verified: capsule.claims.len() as u32,
            rejected: dropped as u32,
            rejection_breakdown: [("unresolvable_evidence".to_owned(), dropped as u32)]
                .into_iter()
                .collect(),
            quality_score: if total == 0 {
                0.0
            } else {
                capsule.claims.len() as f64 / f64::from(total)
            },
            meets_threshold: dropped * 2 < before,
        });
    }

    capsule.validate()?;
    turn.write_json(TurnDocs::CAPSULE, &capsule)?;
    Ok((capsule, envelope))
}

async fn llm_distill(state: &AppState, bundle: &RawBundle, query: &str) -> Option<DistilledCapsule> {
    let mut evidence = String::new();
    for item in &bundle.items {
        evidence.push_str(&format!(
            "- handle: {}\n  summary: {}\n  preview: {}\n",
            item.handle,
            item.summary.as_deref().unwrap_or("(none)"),
            item.preview.as_deref().unwrap_or("(none)"),
        ));
    }

    let prompt = format!(
        "You are the Verifier. Distill the evidence into checkable claims.\n\
         Every claim must cite at least one evidence handle from the list.\n\
         Claim types: RETAILER, PRICE, SPEC_INFO, BUYING_TIP, MARKET_INFO, \
         AVAILABILITY, PREFERENCE, CONSTRAINT, GENERAL.\n\n\
         ## User Query\n{query}\n\n## Evidence\n{evidence}\n\
         Reply with JSON only:\n\
         {{\"claims\": [{{\"claim\": \"<sentence>\", \"topic\": \"<optional>\", \
           \"evidence\": [\"<handle>\"], \"confidence\": \"high|medium|low\", \
           \"metadata\": {{\"claim_type\": \"RETAILER\"}}}}], \
          \"caveats\": [], \"open_questions\": [], \
          \"recommended_answer_shape\": \"list|comparison|fact|summary\"}}"
    );

    let response = guarded_llm_call(state, LlmRole::Planner, prompt, 900, 0.2)
        .await
        .map_err(|e| tracing::warn!(error = %e, "verifier LLM failed; using heuristic"))
        .ok()?;

    let json = extract_json(&response);
    if json.is_null() {
        return None;
    }

    let mut capsule = DistilledCapsule::new(&bundle.ticket_id);
    if let Some(claims) = json.get("claims").and_then(Value::as_array) {
        for raw in claims {
            if let Ok(claim) = serde_json::from_value::<CapsuleClaim>(raw.clone()) {
                capsule.claims.push(claim);
            }
        }
    }
    for (field, target) in [
        ("caveats", &mut capsule.caveats),
        ("open_questions", &mut capsule.open_questions),
    ] {
        if let Some(items) = json.get(field).and_then(Value::as_array) {
            *target = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
        }
    }
    capsule.recommended_answer_shape = json
        .get("recommended_answer_shape")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // Carry artifact references for blob-backed evidence.
    capsule.artifacts = bundle
        .items
        .iter()
        .filter_map(|item| {
            item.blob_id.as_ref().map(|blob_id| CapsuleArtifact {
                label: item.handle.clone(),
                blob_id: blob_id.clone(),
            })
        })
        .collect();

    Some(capsule)
}

/// Fallback: one low-confidence claim per successful evidence item, citing
/// its own handle.
fn heuristic_capsule(bundle: &RawBundle) -> DistilledCapsule {
    let mut capsule = DistilledCapsule::new(&bundle.ticket_id);
    for item in &bundle.items {
        let success = item
            .metadata
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !success {
            continue;
        }
        let Some(summary) = item.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        capsule.claims.push(CapsuleClaim {
            claim: summary.to_owned(),
            topic: None,
            evidence: vec![item.handle.clone()],
            confidence: Confidence::Low,
            last_verified: None,
            claim_id: None,
            ttl_seconds: None,
            metadata: Default::default(),
        });
    }
    if capsule.claims.is_empty() {
        capsule.status = BundleStatus::Empty;
    }
    capsule
        .caveats
        .push("claims distilled heuristically without verification".into());
    capsule
}

async fn promote_claims(
    state: &AppState,
    capsule: &DistilledCapsule,
    session_id: &str,
    intent: QueryIntent,
) {
    let domain = intent.cache_domains().first().copied().unwrap_or("general");
    for claim in &capsule.claims {
        let claim_type = claim
            .metadata
            .get("claim_type")
            .and_then(Value::as_str)
            .map(ClaimType::parse)
            .unwrap_or_default();

        let mut row = ClaimRow::new(session_id, claim_type, &claim.claim);
        row.evidence_handles = claim.evidence.clone();
        row.confidence = claim.confidence;
        row.embedding = state.embedder.embed(&claim.claim);
        if let Some(verified) = claim.last_verified {
            row.last_verified = verified;
        }
        row.metadata
            .insert("domain".into(), Value::String(domain.to_owned()));

        // Anchor the claim in the topic forest when the verifier named one.
        if let Some(topic_name) = claim.topic.as_deref().filter(|t| !t.trim().is_empty()) {
            match state.topics.create_topic(session_id, topic_name, None) {
                Ok(topic) => {
                    let _ = state.topics.record_access(&topic.topic_id);
                    row.topic_id = Some(topic.topic_id);
                }
                Err(e) => tracing::warn!(error = %e, topic_name, "topic creation failed"),
            }
        }

        match state.claims.upsert(row) {
            Ok(stored) => state.claim_cache.put(&stored, domain).await,
            Err(e) => tracing::warn!(error = %e, "claim promotion failed"),
        }
    }
}

fn build_envelope(capsule: &DistilledCapsule, prior: Option<&DistilledCapsule>) -> CapsuleEnvelope {
    let delta_result = compute_delta(capsule, prior);
    let is_delta = prior.is_some();
    let claims = if is_delta { &delta_result.claims } else { &capsule.claims };

    let mut envelope = CapsuleEnvelope::empty(&capsule.ticket_id, capsule.status);
    envelope.delta = is_delta;
    envelope.caveats = capsule.caveats.clone();
    envelope.open_questions = capsule.open_questions.clone();
    envelope.artifacts = capsule.artifacts.clone();
    envelope.budget_report = capsule.budget_report.clone();

    for claim in claims {
        let id = claim
            .claim_id
            .clone()
            .unwrap_or_else(|| claim_id_for(&claim.claim));
        envelope.claim_summaries.insert(id.clone(), claim.claim.clone());
        envelope.claims_topk.push(id);
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::bundle::{BundleItemKind, RawBundleItem};

    fn bundle_with_items(n: usize) -> RawBundle {
        let mut bundle = RawBundle::new("t-1");
        for i in 0..n {
            bundle.items.push(RawBundleItem {
                handle: format!("h{i}"),
                kind: BundleItemKind::ToolOutput,
                summary: Some(format!("evidence item {i}")),
                blob_id: None,
                preview: None,
                metadata: Default::default(),
            });
        }
        bundle
    }

    #[test]
    fn heuristic_capsule_cites_own_handles() {
        let capsule = heuristic_capsule(&bundle_with_items(3));
        assert_eq!(capsule.claims.len(), 3);
        assert_eq!(capsule.claims[0].evidence, vec!["h0".to_string()]);
        assert!(capsule.validate().is_ok());
    }

    #[test]
    fn ranker_orders_by_confidence_then_recency() {
        let now = Utc::now();
        let make = |confidence, at| CapsuleClaim {
            claim: "x".into(),
            topic: None,
            evidence: vec!["h".into()],
            confidence,
            last_verified: Some(at),
            claim_id: None,
            ttl_seconds: None,
            metadata: Default::default(),
        };
        let mut claims = vec![
            make(Confidence::Low, now),
            make(Confidence::High, now - chrono::Duration::hours(1)),
            make(Confidence::High, now),
        ];
        QualityRanker.rank(&mut claims);
        assert_eq!(claims[0].confidence, Confidence::High);
        assert_eq!(claims[0].last_verified.unwrap(), now);
        assert_eq!(claims[2].confidence, Confidence::Low);
    }

    #[test]
    fn envelope_without_prior_is_full_snapshot() {
        let mut capsule = DistilledCapsule::new("t-1");
        capsule.claims.push(CapsuleClaim {
            claim: "a claim".into(),
            topic: None,
            evidence: vec!["h0".into()],
            confidence: Confidence::Medium,
            last_verified: Some(Utc::now()),
            claim_id: Some("claim-1".into()),
            ttl_seconds: None,
            metadata: Default::default(),
        });
        let envelope = build_envelope(&capsule, None);
        assert!(!envelope.delta);
        assert_eq!(envelope.claims_topk, vec!["claim-1".to_string()]);
    }
}
