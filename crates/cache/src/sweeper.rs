//! Centralized eviction sweeper.
//!
//! One scheduled task walks every registered cache layer: TTL expiry, then
//! quality pruning, then LRU size eviction. Registration is explicit so new
//! layers integrate without their own timers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::layer::{CacheLayer, SweepOutcome};

/// Per-sweep report, one row per layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub sweep_number: u64,
    pub layers: Vec<(String, SweepOutcome)>,
    pub total_expired: usize,
    pub total_pruned: usize,
    pub total_evicted: usize,
}

pub struct CacheSweeper {
    layers: RwLock<Vec<Arc<CacheLayer>>>,
    min_quality_threshold: f64,
    interval_seconds: u64,
    sweep_count: RwLock<u64>,
}

impl CacheSweeper {
    pub fn new(interval_seconds: u64, min_quality_threshold: f64) -> Self {
        Self {
            layers: RwLock::new(Vec::new()),
            min_quality_threshold,
            interval_seconds,
            sweep_count: RwLock::new(0),
        }
    }

    /// Register a layer for sweeping. Layers registered twice are swept
    /// twice, so callers register each exactly once.
    pub fn register(&self, layer: Arc<CacheLayer>) {
        tracing::info!(layer = layer.name(), "cache layer registered with sweeper");
        self.layers.write().push(layer);
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    /// Run one sweep over every registered layer. Idempotent: a second run
    /// with no intervening writes removes nothing.
    pub fn sweep_now(&self, now: DateTime<Utc>) -> SweepReport {
        let layers = self.layers.read().clone();
        let mut report = SweepReport::default();
        for layer in layers {
            let outcome = layer.sweep(now, self.min_quality_threshold);
            report.total_expired += outcome.expired;
            report.total_pruned += outcome.pruned;
            report.total_evicted += outcome.evicted;
            report.layers.push((layer.name().to_owned(), outcome));
        }

        let mut count = self.sweep_count.write();
        *count += 1;
        report.sweep_number = *count;

        tracing::info!(
            sweep = report.sweep_number,
            expired = report.total_expired,
            pruned = report.total_pruned,
            evicted = report.total_evicted,
            "cache sweep complete"
        );
        report
    }

    /// Background loop: sweep on a fixed cadence until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep_now(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::Value;

    #[tokio::test]
    async fn sweeps_all_registered_layers() {
        let sweeper = CacheSweeper::new(300, 0.3);
        let a = Arc::new(CacheLayer::new("a", 10));
        let b = Arc::new(CacheLayer::new("b", 10));
        sweeper.register(a.clone());
        sweeper.register(b.clone());

        let mut stale = CacheEntry::new("x", Value::Null, "general", 60);
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);
        stale.quality_score = 0.9;
        a.upsert(stale).await;

        let mut junk = CacheEntry::new("y", Value::Null, "general", 3600);
        junk.quality_score = 0.05;
        b.upsert(junk).await;

        let report = sweeper.sweep_now(Utc::now());
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.total_expired, 1);
        assert_eq!(report.total_pruned, 1);

        // Second run with no writes: a no-op.
        let second = sweeper.sweep_now(Utc::now());
        assert_eq!(second.total_expired + second.total_pruned + second.total_evicted, 0);
        assert_eq!(second.sweep_number, 2);
    }
}
