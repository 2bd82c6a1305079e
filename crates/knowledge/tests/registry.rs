//! Claim registry + topic index integration tests on an in-memory database.

use std::sync::Arc;

use chrono::{Duration, Utc};

use cg_domain::capsule::{CapsuleClaim, DistilledCapsule};
use cg_domain::claim::{ClaimRow, ClaimType, Confidence};
use cg_knowledge::{compute_delta, KnowledgeDb};
use cg_state::EmbeddingService;

fn claim(session: &str, statement: &str) -> ClaimRow {
    ClaimRow::new(session, ClaimType::Retailer, statement)
}

#[test]
fn upsert_twice_merges_into_one_row() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let registry = db.claims();

    let mut first = claim("s1", "HamsterHaus ships to the EU");
    first.evidence_handles = vec!["h1".into()];
    let mut second = claim("s1", "HamsterHaus ships to the EU");
    second.evidence_handles = vec!["h2".into()];

    registry.upsert(first).unwrap();
    let merged = registry.upsert(second).unwrap();

    assert_eq!(merged.times_reused, 1);
    assert!(merged.evidence_handles.contains(&"h1".to_string()));
    assert!(merged.evidence_handles.contains(&"h2".to_string()));

    let all = registry.get_for_session("s1", None, 10).unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn ttl_scales_with_confidence_on_insert() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let registry = db.claims();

    let mut high = claim("s1", "high confidence fact");
    high.confidence = Confidence::High;
    high.ttl_seconds = 0;
    let stored = registry.upsert(high).unwrap();
    assert_eq!(stored.ttl_seconds, 48 * 3600);

    let mut low = claim("s1", "low confidence fact");
    low.confidence = Confidence::Low;
    low.ttl_seconds = 0;
    let stored = registry.upsert(low).unwrap();
    assert_eq!(stored.ttl_seconds, 6 * 3600);
}

#[test]
fn mark_reused_deprecates_low_quality() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let registry = db.claims();

    let mut row = claim("s1", "flaky fact");
    row.user_feedback_score = 0.1;
    let id = registry.upsert(row).unwrap().claim_id;

    // Repeated unhelpful reuses drive quality below the floor.
    let mut last = None;
    for _ in 0..5 {
        last = registry.mark_reused(&id, false).unwrap();
    }
    assert!(last.unwrap().deprecated);
}

#[test]
fn prune_expired_flags_stale_claims() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let registry = db.claims();

    let mut row = claim("s1", "perishable price");
    row.ttl_seconds = 60;
    row.last_verified = Utc::now() - Duration::seconds(120);
    registry.upsert(row).unwrap();

    let pruned = registry.prune_expired(Utc::now()).unwrap();
    assert_eq!(pruned, 1);
    // A second run is a no-op.
    assert_eq!(registry.prune_expired(Utc::now()).unwrap(), 0);
}

#[test]
fn get_by_topic_orders_by_quality() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let registry = db.claims();

    let mut good = claim("s1", "good claim");
    good.topic_id = Some("t1".into());
    good.evidence_handles = vec!["h1".into(), "h2".into(), "h3".into()];
    good.user_feedback_score = 0.9;

    let mut weak = claim("s1", "weak claim");
    weak.topic_id = Some("t1".into());
    weak.user_feedback_score = 0.2;

    registry.upsert(weak).unwrap();
    registry.upsert(good).unwrap();

    let rows = registry.get_by_topic("t1", 10).unwrap();
    assert_eq!(rows[0].statement, "good claim");
}

#[test]
fn delta_keeps_new_and_refreshed_claims_only() {
    let now = Utc::now();
    let make = |id: &str, verified| CapsuleClaim {
        claim: format!("claim {id}"),
        topic: None,
        evidence: vec!["h1".into()],
        confidence: Confidence::Medium,
        last_verified: Some(verified),
        claim_id: Some(id.to_owned()),
        ttl_seconds: None,
        metadata: Default::default(),
    };

    let mut prior = DistilledCapsule::new("t-1");
    prior.claims = vec![make("a", now - Duration::hours(2)), make("b", now - Duration::hours(2))];

    let mut current = DistilledCapsule::new("t-1");
    current.claims = vec![
        make("a", now - Duration::hours(2)), // unchanged
        make("b", now),                      // refreshed
        make("c", now),                      // new
    ];

    let delta = compute_delta(&current, Some(&prior));
    let ids: Vec<_> = delta.claims.iter().filter_map(|c| c.claim_id.as_deref()).collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[test]
fn topic_inheritance_unions_and_overrides() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let embedder = Arc::new(EmbeddingService::new());
    let topics = db.topics(embedder);

    let parent = topics.create_topic("s1", "hamsters", None).unwrap();
    topics
        .update_topic(
            &parent.topic_id,
            &["PetWorld".into()],
            Some(cg_knowledge::topics::PriceRange {
                min: 10.0,
                max: 100.0,
                currency: "EUR".into(),
            }),
            &[("habitat".to_string(), "cage".to_string())].into_iter().collect(),
        )
        .unwrap();

    let child = topics
        .create_topic("s1", "syrian hamsters", Some(&parent.topic_id))
        .unwrap();
    topics
        .update_topic(
            &child.topic_id,
            &["HamsterHaus".into()],
            None,
            &[("habitat".to_string(), "large cage".to_string())].into_iter().collect(),
        )
        .unwrap();

    let resolved = topics.resolve_inheritance(&child.topic_id).unwrap();
    assert!(resolved.retailers.contains(&"PetWorld".to_string()));
    assert!(resolved.retailers.contains(&"HamsterHaus".to_string()));
    // Child spec wins; parent price range inherited.
    assert_eq!(resolved.key_specs.get("habitat").unwrap(), "large cage");
    assert_eq!(resolved.price_range.unwrap().max, 100.0);
}

#[test]
fn topic_search_finds_similar_names() {
    let db = KnowledgeDb::open_in_memory().unwrap();
    let embedder = Arc::new(EmbeddingService::new());
    let topics = db.topics(embedder);
    let registry = db.claims();

    let topic = topics.create_topic("s1", "syrian hamster breeders", None).unwrap();
    let mut row = claim("s1", "HamsterHaus breeds syrians");
    row.topic_id = Some(topic.topic_id.clone());
    registry.upsert(row).unwrap();

    let matches = topics
        .search_by_query("syrian hamster breeders", "s1", Some(0.75))
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].claim_count, 1);

    let none = topics
        .search_by_query("steel pipe fittings", "s1", Some(0.75))
        .unwrap();
    assert!(none.is_empty());
}
