//! The claim registry: typed, TTL'd factual claims with evidence, quality
//! counters, and deprecation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use cg_domain::capsule::{CapsuleArtifact, CapsuleClaim, DistilledCapsule};
use cg_domain::claim::{ClaimRow, ClaimType, Confidence};
use cg_domain::Result;
use cg_state::FreshnessOracle;

use crate::db::sql_err;

/// Quality floor below which a reused claim is deprecated.
const DEPRECATION_THRESHOLD: f64 = 0.30;

pub struct ClaimRegistry {
    conn: Arc<Mutex<Connection>>,
    oracle: FreshnessOracle,
}

impl ClaimRegistry {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            oracle: FreshnessOracle::default(),
        }
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert or merge a claim.
    ///
    /// Deduplicates by `claim_id`: on conflict the evidence sets are merged,
    /// `last_verified` advances only if the new observation is more recent,
    /// and `times_reused` is incremented. TTL is (re)derived from confidence
    /// when the row carries none.
    pub fn upsert(&self, mut row: ClaimRow) -> Result<ClaimRow> {
        if row.ttl_seconds <= 0 {
            row.ttl_seconds = self.oracle.suggest_ttl_seconds(row.confidence);
        }

        let conn = self.conn.lock();
        let existing = get_by_id_inner(&conn, &row.claim_id)?;

        match existing {
            None => {
                insert_row(&conn, &row)?;
                Ok(row)
            }
            Some(mut current) => {
                for handle in &row.evidence_handles {
                    if !current.evidence_handles.contains(handle) {
                        current.evidence_handles.push(handle.clone());
                    }
                }
                if row.last_verified > current.last_verified {
                    current.last_verified = row.last_verified;
                    current.confidence = row.confidence;
                    current.ttl_seconds = row.ttl_seconds;
                }
                current.times_reused += 1;
                if current.topic_id.is_none() {
                    current.topic_id = row.topic_id;
                }
                update_row(&conn, &current)?;
                Ok(current)
            }
        }
    }

    /// Record a reuse outcome. Deprecates the claim when its composite
    /// quality drops below the floor.
    pub fn mark_reused(&self, claim_id: &str, was_helpful: bool) -> Result<Option<ClaimRow>> {
        let conn = self.conn.lock();
        let Some(mut row) = get_by_id_inner(&conn, claim_id)? else {
            return Ok(None);
        };
        row.times_reused += 1;
        if was_helpful {
            row.times_helpful += 1;
            row.user_feedback_score = (row.user_feedback_score + 0.1).min(1.0);
        } else {
            row.user_feedback_score = (row.user_feedback_score - 0.1).max(0.0);
        }
        if row.quality_composite() < DEPRECATION_THRESHOLD {
            row.deprecated = true;
            tracing::info!(claim_id, quality = row.quality_composite(), "claim deprecated");
        }
        update_row(&conn, &row)?;
        Ok(Some(row))
    }

    /// Flag expired claims as deprecated; returns how many were flagged.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = select_rows(&conn, "SELECT * FROM claims WHERE deprecated = 0", &[])?;
        let mut pruned = 0;
        for mut row in rows {
            if row.is_stale(now) {
                row.deprecated = true;
                update_row(&conn, &row)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&self, claim_id: &str) -> Result<Option<ClaimRow>> {
        let conn = self.conn.lock();
        get_by_id_inner(&conn, claim_id)
    }

    /// Claims for a topic, ordered by composite quality, best first.
    pub fn get_by_topic(&self, topic_id: &str, limit: usize) -> Result<Vec<ClaimRow>> {
        let conn = self.conn.lock();
        let mut rows = select_rows(
            &conn,
            "SELECT * FROM claims WHERE topic_id = ?1 AND deprecated = 0",
            &[&topic_id],
        )?;
        sort_by_quality(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    /// Recent non-deprecated claims for a session, optionally filtered by
    /// type, newest verification first.
    pub fn get_for_session(
        &self,
        session_id: &str,
        claim_type: Option<ClaimType>,
        limit: usize,
    ) -> Result<Vec<ClaimRow>> {
        let conn = self.conn.lock();
        let mut rows = match claim_type {
            Some(ct) => select_rows(
                &conn,
                "SELECT * FROM claims WHERE session_id = ?1 AND claim_type = ?2 AND deprecated = 0",
                &[&session_id, &ct.as_str()],
            )?,
            None => select_rows(
                &conn,
                "SELECT * FROM claims WHERE session_id = ?1 AND deprecated = 0",
                &[&session_id],
            )?,
        };
        rows.sort_by(|a, b| b.last_verified.cmp(&a.last_verified));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Count of live claims attached to a topic.
    pub fn count_for_topic(&self, topic_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM claims WHERE topic_id = ?1 AND deprecated = 0",
                params![topic_id],
                |r| r.get(0),
            )
            .map_err(sql_err)?;
        Ok(count as usize)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capsule deltas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The claims and artifacts of `capsule` that are new or refreshed relative
/// to `prior`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapsuleDeltaResult {
    pub claims: Vec<CapsuleClaim>,
    pub artifacts: Vec<CapsuleArtifact>,
}

/// Minimize tokens sent downstream: keep only claims absent from the prior
/// capsule or verified more recently than the prior observation, plus
/// artifacts the prior capsule did not carry.
pub fn compute_delta(capsule: &DistilledCapsule, prior: Option<&DistilledCapsule>) -> CapsuleDeltaResult {
    let Some(prior) = prior else {
        return CapsuleDeltaResult {
            claims: capsule.claims.clone(),
            artifacts: capsule.artifacts.clone(),
        };
    };

    let prior_by_id: BTreeMap<&str, &CapsuleClaim> = prior
        .claims
        .iter()
        .filter_map(|c| c.claim_id.as_deref().map(|id| (id, c)))
        .collect();

    let claims = capsule
        .claims
        .iter()
        .filter(|claim| match claim.claim_id.as_deref().and_then(|id| prior_by_id.get(id)) {
            None => true,
            Some(prev) => match (claim.last_verified, prev.last_verified) {
                (Some(new), Some(old)) => new > old,
                (Some(_), None) => true,
                _ => false,
            },
        })
        .cloned()
        .collect();

    let prior_blobs: Vec<&str> = prior.artifacts.iter().map(|a| a.blob_id.as_str()).collect();
    let artifacts = capsule
        .artifacts
        .iter()
        .filter(|a| !prior_blobs.contains(&a.blob_id.as_str()))
        .cloned()
        .collect();

    CapsuleDeltaResult { claims, artifacts }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn sort_by_quality(rows: &mut [ClaimRow]) {
    rows.sort_by(|a, b| {
        b.quality_composite()
            .partial_cmp(&a.quality_composite())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_verified.cmp(&a.last_verified))
    });
}

fn get_by_id_inner(conn: &Connection, claim_id: &str) -> Result<Option<ClaimRow>> {
    conn.query_row(
        "SELECT * FROM claims WHERE claim_id = ?1",
        params![claim_id],
        row_to_claim,
    )
    .optional()
    .map_err(sql_err)
}

fn select_rows(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<ClaimRow>> {
    let mut stmt = conn.prepare(sql).map_err(sql_err)?;
    let rows = stmt
        .query_map(args, row_to_claim)
        .map_err(sql_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    Ok(rows)
}

fn insert_row(conn: &Connection, row: &ClaimRow) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO claims (
            claim_id, session_id, topic_id, claim_type, statement,
            evidence_handles, confidence, embedding, last_verified,
            ttl_seconds, times_reused, times_helpful, user_feedback_score,
            deprecated, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            row.claim_id,
            row.session_id,
            row.topic_id,
            row.claim_type.as_str(),
            row.statement,
            serde_json::to_string(&row.evidence_handles).unwrap_or_else(|_| "[]".into()),
            row.confidence.as_str(),
            serde_json::to_string(&row.embedding).unwrap_or_else(|_| "[]".into()),
            row.last_verified.to_rfc3339(),
            row.ttl_seconds,
            row.times_reused,
            row.times_helpful,
            row.user_feedback_score,
            row.deprecated as i64,
            serde_json::to_string(&row.metadata).unwrap_or_else(|_| "{}".into()),
        ],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn update_row(conn: &Connection, row: &ClaimRow) -> Result<()> {
    conn.execute(
        r#"
        UPDATE claims SET
            session_id = ?2, topic_id = ?3, claim_type = ?4, statement = ?5,
            evidence_handles = ?6, confidence = ?7, embedding = ?8,
            last_verified = ?9, ttl_seconds = ?10, times_reused = ?11,
            times_helpful = ?12, user_feedback_score = ?13, deprecated = ?14,
            metadata = ?15
        WHERE claim_id = ?1
        "#,
        params![
            row.claim_id,
            row.session_id,
            row.topic_id,
            row.claim_type.as_str(),
            row.statement,
            serde_json::to_string(&row.evidence_handles).unwrap_or_else(|_| "[]".into()),
            row.confidence.as_str(),
            serde_json::to_string(&row.embedding).unwrap_or_else(|_| "[]".into()),
            row.last_verified.to_rfc3339(),
            row.ttl_seconds,
            row.times_reused,
            row.times_helpful,
            row.user_feedback_score,
            row.deprecated as i64,
            serde_json::to_string(&row.metadata).unwrap_or_else(|_| "{}".into()),
        ],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn row_to_claim(row: &Row<'_>) -> rusqlite::Result<ClaimRow> {
    let evidence: String = row.get("evidence_handles")?;
    let embedding: String = row.get("embedding")?;
    let metadata: String = row.get("metadata")?;
    let confidence: String = row.get("confidence")?;
    let claim_type: String = row.get("claim_type")?;
    let last_verified: String = row.get("last_verified")?;

    Ok(ClaimRow {
        claim_id: row.get("claim_id")?,
        session_id: row.get("session_id")?,
        topic_id: row.get("topic_id")?,
        claim_type: ClaimType::parse(&claim_type),
        statement: row.get("statement")?,
        evidence_handles: serde_json::from_str(&evidence).unwrap_or_default(),
        confidence: Confidence::parse(&confidence),
        embedding: serde_json::from_str(&embedding).unwrap_or_default(),
        last_verified: DateTime::parse_from_rfc3339(&last_verified)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        ttl_seconds: row.get("ttl_seconds")?,
        times_reused: row.get::<_, i64>("times_reused")? as u32,
        times_helpful: row.get::<_, i64>("times_helpful")? as u32,
        user_feedback_score: row.get("user_feedback_score")?,
        deprecated: row.get::<_, i64>("deprecated")? != 0,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}
