use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::bundle::BundleStatus;
use crate::claim::Confidence;
use crate::error::{Error, Result};

/// A single checkable sentence with cited evidence, as distilled by the
/// verifier. Invariant: at least one evidence handle, each resolving to a
/// bundle item of the same turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapsuleClaim {
    pub claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub evidence: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl CapsuleClaim {
    pub fn validate(&self) -> Result<()> {
        if self.claim.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "verifier".into(),
                detail: "claim text cannot be empty".into(),
            });
        }
        if self.evidence.is_empty() {
            return Err(Error::ContractViolation {
                component: "verifier".into(),
                detail: format!("claim cites no evidence: {}", self.claim),
            });
        }
        Ok(())
    }
}

/// Labelled reference to a stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapsuleArtifact {
    pub label: String,
    pub blob_id: String,
}

impl CapsuleArtifact {
    pub fn validate(&self) -> Result<()> {
        if !self.blob_id.starts_with("blob://") {
            return Err(Error::ContractViolation {
                component: "verifier".into(),
                detail: format!("artifact blob_id must use blob:// prefix: {}", self.blob_id),
            });
        }
        Ok(())
    }
}

/// Verifier output: the compact, evidence-backed summary of everything the
/// execution tier gathered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistilledCapsule {
    #[serde(rename = "_type", default = "capsule_tag")]
    pub type_tag: String,
    pub ticket_id: String,
    #[serde(default)]
    pub status: BundleStatus,
    #[serde(default)]
    pub claims: Vec<CapsuleClaim>,
    #[serde(default)]
    pub caveats: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<CapsuleArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_answer_shape: Option<String>,
    #[serde(default)]
    pub budget_report: BTreeMap<String, Value>,
}

fn capsule_tag() -> String {
    "CAPSULE".to_owned()
}

impl DistilledCapsule {
    pub fn new(ticket_id: impl Into<String>) -> Self {
        Self {
            type_tag: capsule_tag(),
            ticket_id: ticket_id.into(),
            status: BundleStatus::Ok,
            claims: Vec::new(),
            caveats: Vec::new(),
            open_questions: Vec::new(),
            artifacts: Vec::new(),
            recommended_answer_shape: None,
            budget_report: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticket_id.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "verifier".into(),
                detail: "capsule ticket_id is required".into(),
            });
        }
        for claim in &self.claims {
            claim.validate()?;
        }
        for artifact in &self.artifacts {
            artifact.validate()?;
        }
        Ok(())
    }
}

/// Retrieval quality diagnostics attached to an envelope when the verifier
/// rejected part of the evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub total_fetched: u32,
    pub verified: u32,
    pub rejected: u32,
    #[serde(default)]
    pub rejection_breakdown: BTreeMap<String, u32>,
    /// verified / total_fetched, in [0, 1].
    pub quality_score: f64,
    #[serde(default = "default_true")]
    pub meets_threshold: bool,
}

fn default_true() -> bool {
    true
}

/// The packaged, minimal form of a capsule delivered to the synthesizer:
/// claim IDs plus short summaries, never the raw bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapsuleEnvelope {
    pub ticket_id: String,
    pub status: BundleStatus,
    pub claims_topk: Vec<String>,
    pub claim_summaries: BTreeMap<String, String>,
    #[serde(default)]
    pub caveats: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<CapsuleArtifact>,
    /// True when this envelope is an increment over working memory rather
    /// than a full snapshot.
    pub delta: bool,
    #[serde(default)]
    pub budget_report: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_report: Option<QualityReport>,
}

impl CapsuleEnvelope {
    /// An empty envelope with the given status — the safe default the
    /// contract enforcer falls back to.
    pub fn empty(ticket_id: impl Into<String>, status: BundleStatus) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status,
            claims_topk: Vec::new(),
            claim_summaries: BTreeMap::new(),
            caveats: Vec::new(),
            open_questions: Vec::new(),
            artifacts: Vec::new(),
            delta: false,
            budget_report: BTreeMap::new(),
            quality_report: None,
        }
    }
}

/// Working-memory caps applied when ranking capsule claims into an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingMemoryCaps {
    /// Registry claims the working-memory set (the context carried into a
    /// turn) may hold; distinct from the per-capsule top-k below.
    pub max_claims: usize,
    pub max_open_questions: usize,
    pub max_artifacts: usize,
    /// Claims a single distilled capsule may carry.
    pub capsule_claim_limit: usize,
}

impl Default for WorkingMemoryCaps {
    fn default() -> Self {
        Self {
            max_claims: 15,
            max_open_questions: 5,
            max_artifacts: 5,
            capsule_claim_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(text: &str, evidence: &[&str]) -> CapsuleClaim {
        CapsuleClaim {
            claim: text.into(),
            topic: None,
            evidence: evidence.iter().map(|s| s.to_string()).collect(),
            confidence: Confidence::Medium,
            last_verified: None,
            claim_id: None,
            ttl_seconds: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn zero_evidence_claim_rejected() {
        assert!(claim("x is y", &[]).validate().is_err());
        assert!(claim("x is y", &["h1"]).validate().is_ok());
    }

    #[test]
    fn capsule_serde_round_trip() {
        let mut capsule = DistilledCapsule::new("t-1");
        capsule.claims.push(claim("x is y", &["h1"]));
        capsule.artifacts.push(CapsuleArtifact {
            label: "serp".into(),
            blob_id: "blob://deadbeef".into(),
        });
        let json = serde_json::to_string(&capsule).unwrap();
        let back: DistilledCapsule = serde_json::from_str(&json).unwrap();
        assert_eq!(capsule, back);
        assert!(json.contains("\"_type\":\"CAPSULE\""));
    }

    #[test]
    fn artifact_without_blob_prefix_rejected() {
        let art = CapsuleArtifact {
            label: "x".into(),
            blob_id: "sha256:abc".into(),
        };
        assert!(art.validate().is_err());
    }
}
