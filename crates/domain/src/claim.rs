use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Confidence label attached to claims and capsule entries. TTL scaling is
/// derived from this (high 48h, medium 24h, low 6h — see the freshness
/// oracle in cg-state).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

/// Typed category of a registry claim.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimType {
    Retailer,
    Price,
    SpecInfo,
    BuyingTip,
    MarketInfo,
    Availability,
    Preference,
    Constraint,
    #[default]
    General,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Retailer => "RETAILER",
            ClaimType::Price => "PRICE",
            ClaimType::SpecInfo => "SPEC_INFO",
            ClaimType::BuyingTip => "BUYING_TIP",
            ClaimType::MarketInfo => "MARKET_INFO",
            ClaimType::Availability => "AVAILABILITY",
            ClaimType::Preference => "PREFERENCE",
            ClaimType::Constraint => "CONSTRAINT",
            ClaimType::General => "GENERAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "RETAILER" => ClaimType::Retailer,
            "PRICE" => ClaimType::Price,
            "SPEC_INFO" => ClaimType::SpecInfo,
            "BUYING_TIP" => ClaimType::BuyingTip,
            "MARKET_INFO" => ClaimType::MarketInfo,
            "AVAILABILITY" => ClaimType::Availability,
            "PREFERENCE" => ClaimType::Preference,
            "CONSTRAINT" => ClaimType::Constraint,
            _ => ClaimType::General,
        }
    }
}

/// Compute the stable claim identifier: sha256 over the canonicalized
/// statement (lowercased, whitespace-collapsed). Equal statements produced
/// twice dedup to a single row.
pub fn claim_id_for(statement: &str) -> String {
    let canonical: String = statement
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("claim-{}", hex::encode(&digest[..16]))
}

/// A persistent row in the claim registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimRow {
    pub claim_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub claim_type: ClaimType,
    pub statement: String,
    #[serde(default)]
    pub evidence_handles: Vec<String>,
    pub confidence: Confidence,
    /// 384-dim embedding of the statement; empty when the embedder was
    /// unavailable at write time.
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub last_verified: DateTime<Utc>,
    pub ttl_seconds: i64,
    #[serde(default)]
    pub times_reused: u32,
    #[serde(default)]
    pub times_helpful: u32,
    /// Running user feedback score in [0, 1].
    #[serde(default = "default_feedback")]
    pub user_feedback_score: f64,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_feedback() -> f64 {
    0.5
}

impl ClaimRow {
    pub fn new(session_id: impl Into<String>, claim_type: ClaimType, statement: impl Into<String>) -> Self {
        let statement = statement.into();
        Self {
            claim_id: claim_id_for(&statement),
            session_id: session_id.into(),
            topic_id: None,
            claim_type,
            statement,
            evidence_handles: Vec::new(),
            confidence: Confidence::Medium,
            embedding: Vec::new(),
            last_verified: Utc::now(),
            ttl_seconds: 24 * 3600,
            times_reused: 0,
            times_helpful: 0,
            user_feedback_score: default_feedback(),
            deprecated: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Composite quality used for ranking and deprecation:
    /// `0.4·intent_alignment + 0.3·evidence_strength + 0.3·feedback`.
    ///
    /// Intent alignment is approximated by the reuse-helpfulness ratio and
    /// evidence strength by the (capped) evidence count.
    pub fn quality_composite(&self) -> f64 {
        let intent_alignment = if self.times_reused == 0 {
            0.5
        } else {
            f64::from(self.times_helpful) / f64::from(self.times_reused)
        };
        let evidence_strength = (self.evidence_handles.len() as f64 / 3.0).min(1.0);
        0.4 * intent_alignment + 0.3 * evidence_strength + 0.3 * self.user_feedback_score
    }

    /// Expiry instant derived from `last_verified + ttl_seconds`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_verified + chrono::Duration::seconds(self.ttl_seconds.max(0))
    }

    /// A claim is stale from the expiry instant onward (strict `<` for fresh).
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_id_is_canonical() {
        let a = claim_id_for("HamsterHaus  ships to the EU");
        let b = claim_id_for("hamsterhaus ships to the eu");
        assert_eq!(a, b);
        assert!(a.starts_with("claim-"));
    }

    #[test]
    fn quality_composite_bounds() {
        let mut row = ClaimRow::new("s1", ClaimType::Retailer, "x sells y");
        row.evidence_handles = vec!["h1".into(), "h2".into(), "h3".into(), "h4".into()];
        row.times_reused = 4;
        row.times_helpful = 4;
        row.user_feedback_score = 1.0;
        let q = row.quality_composite();
        assert!(q <= 1.0 && q > 0.9);
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let mut row = ClaimRow::new("s1", ClaimType::Price, "x costs 10");
        row.ttl_seconds = 60;
        let exactly_at_ttl = row.last_verified + chrono::Duration::seconds(60);
        assert!(row.is_stale(exactly_at_ttl));
        assert!(!row.is_stale(exactly_at_ttl - chrono::Duration::seconds(1)));
    }

    #[test]
    fn claim_type_parse_unknown_is_general() {
        assert_eq!(ClaimType::parse("WEIRD"), ClaimType::General);
        assert_eq!(ClaimType::parse("retailer"), ClaimType::Retailer);
    }
}
