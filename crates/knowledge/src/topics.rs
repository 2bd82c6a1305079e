//! Hierarchical topic index with vector search.
//!
//! Topics form a forest per session. Children inherit parent knowledge
//! (retailers, key specs); child values override on conflict, and the most
//! specific price range wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use cg_domain::{Error, Result};
use cg_state::{cosine_similarity, EmbeddingService};

use crate::db::sql_err;

/// Minimum cosine similarity for a query to match a topic.
const DEFAULT_MIN_SIMILARITY: f64 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub currency: String,
}

/// One node of the topic forest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub topic_id: String,
    pub session_id: String,
    pub topic_name: String,
    pub topic_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Denormalized summaries inherited down the tree.
    #[serde(default)]
    pub retailers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
    #[serde(default)]
    pub key_specs: BTreeMap<String, String>,
}

/// Inherited view of a topic after walking its ancestors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTopic {
    pub retailers: Vec<String>,
    pub price_range: Option<PriceRange>,
    pub key_specs: BTreeMap<String, String>,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMatch {
    pub topic: Topic,
    pub similarity: f64,
    pub claim_count: usize,
}

pub struct TopicIndex {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<EmbeddingService>,
}

impl TopicIndex {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, embedder: Arc<EmbeddingService>) -> Self {
        Self { conn, embedder }
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create a topic (idempotent per `(session, slug)`); the name is
    /// embedded at creation time.
    pub fn create_topic(
        &self,
        session_id: &str,
        topic_name: &str,
        parent_id: Option<&str>,
    ) -> Result<Topic> {
        let slug = slugify(topic_name);
        if let Some(existing) = self.get_by_slug(session_id, &slug)? {
            return Ok(existing);
        }

        if let Some(parent) = parent_id {
            if self.get_topic(parent)?.is_none() {
                return Err(Error::Storage(format!("parent topic not found: {parent}")));
            }
        }

        let topic = Topic {
            topic_id: format!("topic-{}-{slug}", short_hash(session_id)),
            session_id: session_id.to_owned(),
            topic_name: topic_name.to_owned(),
            topic_slug: slug,
            parent_id: parent_id.map(str::to_owned),
            embedding: self.embedder.embed(topic_name),
            retailers: Vec::new(),
            price_range: None,
            key_specs: BTreeMap::new(),
        };

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO topics (
                topic_id, session_id, topic_name, topic_slug, parent_id,
                embedding, retailers, price_range, key_specs, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(topic_id) DO NOTHING
            "#,
            params![
                topic.topic_id,
                topic.session_id,
                topic.topic_name,
                topic.topic_slug,
                topic.parent_id,
                serde_json::to_string(&topic.embedding).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&topic.retailers).unwrap_or_else(|_| "[]".into()),
                None::<String>,
                serde_json::to_string(&topic.key_specs).unwrap_or_else(|_| "{}".into()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(sql_err)?;
        Ok(topic)
    }

    /// Merge new knowledge into a topic's denormalized summaries.
    pub fn update_topic(
        &self,
        topic_id: &str,
        retailers: &[String],
        price_range: Option<PriceRange>,
        key_specs: &BTreeMap<String, String>,
    ) -> Result<Option<Topic>> {
        let Some(mut topic) = self.get_topic(topic_id)? else {
            return Ok(None);
        };
        for r in retailers {
            if !topic.retailers.contains(r) {
                topic.retailers.push(r.clone());
            }
        }
        if price_range.is_some() {
            topic.price_range = price_range;
        }
        for (k, v) in key_specs {
            topic.key_specs.insert(k.clone(), v.clone());
        }

        let conn = self.conn.lock();
        conn.execute(
            "UPDATE topics SET retailers = ?2, price_range = ?3, key_specs = ?4 WHERE topic_id = ?1",
            params![
                topic.topic_id,
                serde_json::to_string(&topic.retailers).unwrap_or_else(|_| "[]".into()),
                topic
                    .price_range
                    .as_ref()
                    .and_then(|p| serde_json::to_string(p).ok()),
                serde_json::to_string(&topic.key_specs).unwrap_or_else(|_| "{}".into()),
            ],
        )
        .map_err(sql_err)?;
        Ok(Some(topic))
    }

    pub fn record_access(&self, topic_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE topics SET last_accessed = ?2 WHERE topic_id = ?1",
            params![topic_id, Utc::now().to_rfc3339()],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_topic(&self, topic_id: &str) -> Result<Option<Topic>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM topics WHERE topic_id = ?1",
            params![topic_id],
            row_to_topic,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn get_by_slug(&self, session_id: &str, slug: &str) -> Result<Option<Topic>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM topics WHERE session_id = ?1 AND topic_slug = ?2",
            params![session_id, slug],
            row_to_topic,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn get_children(&self, topic_id: &str) -> Result<Vec<Topic>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM topics WHERE parent_id = ?1")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![topic_id], row_to_topic)
            .map_err(sql_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(rows)
    }

    /// Ancestors from nearest parent to the root. Defensive against cycles.
    pub fn get_ancestors(&self, topic_id: &str) -> Result<Vec<Topic>> {
        let mut ancestors = Vec::new();
        let mut current = self.get_topic(topic_id)?;
        let mut seen = vec![topic_id.to_owned()];
        while let Some(topic) = current {
            let Some(parent_id) = topic.parent_id.clone() else {
                break;
            };
            if seen.contains(&parent_id) {
                tracing::warn!(topic_id, parent_id, "topic parent cycle detected");
                break;
            }
            seen.push(parent_id.clone());
            current = self.get_topic(&parent_id)?;
            if let Some(parent) = &current {
                ancestors.push(parent.clone());
            }
        }
        Ok(ancestors)
    }

    /// Walk the ancestor chain, unioning retailers and key specs; the most
    /// specific price range (the topic's own, else the nearest ancestor's)
    /// wins.
    pub fn resolve_inheritance(&self, topic_id: &str) -> Result<ResolvedTopic> {
        let Some(topic) = self.get_topic(topic_id)? else {
            return Ok(ResolvedTopic::default());
        };

        let mut resolved = ResolvedTopic {
            retailers: topic.retailers.clone(),
            price_range: topic.price_range.clone(),
            key_specs: topic.key_specs.clone(),
        };

        for ancestor in self.get_ancestors(topic_id)? {
            for r in ancestor.retailers {
                if !resolved.retailers.contains(&r) {
                    resolved.retailers.push(r);
                }
            }
            if resolved.price_range.is_none() {
                resolved.price_range = ancestor.price_range;
            }
            for (k, v) in ancestor.key_specs {
                // Child values override parent values.
                resolved.key_specs.entry(k).or_insert(v);
            }
        }
        Ok(resolved)
    }

    /// Embed the query and rank this session's topics by cosine similarity.
    /// `claim_count` is filled from the claims table sharing the database.
    pub fn search_by_query(
        &self,
        text: &str,
        session_id: &str,
        min_similarity: Option<f64>,
    ) -> Result<Vec<TopicMatch>> {
        let min_similarity = min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY);
        let query_embedding = self.embedder.embed(text);

        let topics = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT * FROM topics WHERE session_id = ?1")
                .map_err(sql_err)?;
            let rows = stmt
                .query_map(params![session_id], row_to_topic)
                .map_err(sql_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            rows
        };

        let mut matches: Vec<TopicMatch> = Vec::new();
        for topic in topics {
            let similarity = cosine_similarity(&query_embedding, &topic.embedding);
            if similarity < min_similarity {
                continue;
            }
            let claim_count = self.claim_count(&topic.topic_id)?;
            matches.push(TopicMatch {
                topic,
                similarity,
                claim_count,
            });
        }
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    fn claim_count(&self, topic_id: &str) -> Result<usize> {
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

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn short_hash(input: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

fn row_to_topic(row: &Row<'_>) -> rusqlite::Result<Topic> {
    let embedding: String = row.get("embedding")?;
    let retailers: String = row.get("retailers")?;
    let price_range: Option<String> = row.get("price_range")?;
    let key_specs: String = row.get("key_specs")?;

    Ok(Topic {
        topic_id: row.get("topic_id")?,
        session_id: row.get("session_id")?,
        topic_name: row.get("topic_name")?,
        topic_slug: row.get("topic_slug")?,
        parent_id: row.get("parent_id")?,
        embedding: serde_json::from_str(&embedding).unwrap_or_default(),
        retailers: serde_json::from_str(&retailers).unwrap_or_default(),
        price_range: price_range.and_then(|p| serde_json::from_str(&p).ok()),
        key_specs: serde_json::from_str(&key_specs).unwrap_or_default(),
    })
}
