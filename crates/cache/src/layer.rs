//! Generic cache layer: domain-partitioned storage with per-key write
//! locks, LRU + quality eviction, and hybrid lookup support.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use cg_state::{HybridScorer, ScoredMatch};

use crate::entry::CacheEntry;

/// Counters reported per layer on the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired_total: u64,
    pub pruned_total: u64,
    pub evicted_total: u64,
}

/// What one sweep pass removed from a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub expired: usize,
    pub pruned: usize,
    pub evicted: usize,
}

/// One cache layer. The three system layers (response / claims / tool
/// output) wrap this with their own keying and freshness policies.
///
/// Reads take the shared lock only; writes serialize per key so concurrent
/// writers for the same key coalesce on the later value.
pub struct CacheLayer {
    name: &'static str,
    entries: RwLock<HashMap<String, CacheEntry>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_entries: usize,
    hits: RwLock<u64>,
    misses: RwLock<u64>,
    removed: RwLock<(u64, u64, u64)>, // (expired, pruned, evicted) lifetime totals
}

impl CacheLayer {
    pub fn new(name: &'static str, max_entries: usize) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            max_entries,
            hits: RwLock::new(0),
            misses: RwLock::new(0),
            removed: RwLock::new((0, 0, 0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert or replace an entry, serialized per key.
    pub async fn upsert(&self, entry: CacheEntry) {
        let key_lock = {
            let mut locks = self.write_locks.lock();
            locks
                .entry(entry.key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;
        self.entries.write().insert(entry.key.clone(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.write_locks.lock().remove(key);
        self.entries.write().remove(key).is_some()
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Exact-key read; records the access for LRU and hit accounting.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let found = {
            let mut entries = self.entries.write();
            entries.get_mut(key).map(|entry| {
                entry.access_count += 1;
                entry.last_accessed = Some(Utc::now());
                entry.clone()
            })
        };
        match &found {
            Some(_) => *self.hits.write() += 1,
            None => *self.misses.write() += 1,
        }
        found
    }

    /// Snapshot of entries whose domain is in the allowed set. This is the
    /// isolation boundary: scoring never sees other domains.
    pub fn candidates(&self, domains: &[&str]) -> Vec<CacheEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| domains.contains(&e.domain.as_str()))
            .cloned()
            .collect()
    }

    /// Hybrid lookup inside the allowed domains. Returns surviving matches
    /// sorted by fused score (keys refer back into the layer).
    pub fn lookup(
        &self,
        scorer: &HybridScorer,
        query_embedding: &[f32],
        query_tokens: &[String],
        domains: &[&str],
        top_k: usize,
    ) -> Vec<ScoredMatch<String>> {
        let candidates: Vec<(String, Vec<f32>, Vec<String>)> = self
            .candidates(domains)
            .into_iter()
            .map(|e| (e.key.clone(), e.embedding, e.text_tokens))
            .collect();
        let ranked = scorer.rank(query_embedding, query_tokens, &candidates, top_k);
        if ranked.is_empty() {
            *self.misses.write() += 1;
        } else {
            *self.hits.write() += 1;
        }
        ranked
    }

    pub fn stats(&self) -> LayerStats {
        let (expired, pruned, evicted) = *self.removed.read();
        LayerStats {
            entries: self.len(),
            hits: *self.hits.read(),
            misses: *self.misses.read(),
            expired_total: expired,
            pruned_total: pruned,
            evicted_total: evicted,
        }
    }

    // ── Eviction (driven by the sweeper) ───────────────────────────

    /// One eviction pass: TTL expiry, then quality pruning, then LRU down
    /// to the size cap. Idempotent when nothing was written in between.
    pub fn sweep(&self, now: DateTime<Utc>, min_quality: f64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut entries = self.entries.write();

        // (a) TTL expiry.
        let expired: Vec<String> = entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        outcome.expired = expired.len();

        // (b) Quality pruning runs before size eviction so high-traffic
        //     low-quality entries cannot survive pressure.
        let low_quality: Vec<String> = entries
            .values()
            .filter(|e| e.quality_score < min_quality)
            .map(|e| e.key.clone())
            .collect();
        for key in &low_quality {
            entries.remove(key);
        }
        outcome.pruned = low_quality.len();

        // (c) LRU eviction down to the cap.
        if entries.len() > self.max_entries {
            let mut by_recency: Vec<(String, DateTime<Utc>)> = entries
                .values()
                .map(|e| (e.key.clone(), e.lru_instant()))
                .collect();
            by_recency.sort_by_key(|(_, at)| *at);
            let overflow = entries.len() - self.max_entries;
            for (key, _) in by_recency.into_iter().take(overflow) {
                entries.remove(&key);
                outcome.evicted += 1;
            }
        }

        drop(entries);

        {
            let mut removed = self.removed.write();
            removed.0 += outcome.expired as u64;
            removed.1 += outcome.pruned as u64;
            removed.2 += outcome.evicted as u64;
        }
        {
            // Drop per-key locks for keys that no longer exist.
            let entries = self.entries.read();
            self.write_locks.lock().retain(|k, _| entries.contains_key(k));
        }

        if outcome != SweepOutcome::default() {
            tracing::debug!(
                layer = self.name,
                expired = outcome.expired,
                pruned = outcome.pruned,
                evicted = outcome.evicted,
                "cache layer swept"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn entry(key: &str, domain: &str, quality: f64, ttl: i64) -> CacheEntry {
        let mut e = CacheEntry::new(key, Value::Null, domain, ttl);
        e.quality_score = quality;
        e
    }

    #[tokio::test]
    async fn domain_isolation_in_candidates() {
        let layer = CacheLayer::new("test", 10);
        layer.upsert(entry("a", "pricing", 0.9, 3600)).await;
        layer.upsert(entry("b", "care", 0.9, 3600)).await;

        let picks = layer.candidates(&["pricing"]);
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].key, "a");
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let layer = CacheLayer::new("test", 10);
        let mut stale = entry("old", "general", 0.9, 60);
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);
        layer.upsert(stale).await;
        layer.upsert(entry("junk", "general", 0.1, 3600)).await;
        layer.upsert(entry("good", "general", 0.9, 3600)).await;

        let first = layer.sweep(Utc::now(), 0.3);
        assert_eq!(first.expired, 1);
        assert_eq!(first.pruned, 1);

        let second = layer.sweep(Utc::now(), 0.3);
        assert_eq!(second, SweepOutcome::default());
        assert_eq!(layer.len(), 1);
    }

    #[tokio::test]
    async fn lru_eviction_removes_oldest_access() {
        let layer = CacheLayer::new("test", 2);
        for key in ["a", "b", "c"] {
            layer.upsert(entry(key, "general", 0.9, 3600)).await;
        }
        // Touch "a" so it is the most recently used.
        layer.get("a");

        let outcome = layer.sweep(Utc::now(), 0.3);
        assert_eq!(outcome.evicted, 1);
        assert!(layer.get("a").is_some());
        assert_eq!(layer.len(), 2);
    }

    #[tokio::test]
    async fn later_writer_wins_for_same_key() {
        let layer = Arc::new(CacheLayer::new("test", 10));
        layer.upsert(entry("k", "general", 0.2, 3600)).await;
        layer.upsert(entry("k", "general", 0.8, 3600)).await;
        let got = layer.get("k").unwrap();
        assert!((got.quality_score - 0.8).abs() < f64::EPSILON);
        assert_eq!(layer.len(), 1);
    }
}
