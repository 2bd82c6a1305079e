//! Freshness heuristics for claim persistence: TTL scales with confidence,
//! and staleness is evaluated with a strict `<` for fresh.

use chrono::{DateTime, Duration, Utc};

use cg_domain::claim::Confidence;

/// Confidence-scaled TTL defaults. Override via the constructor when a
/// domain needs different horizons.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessOracle {
    pub high_conf_seconds: i64,
    pub medium_conf_seconds: i64,
    pub low_conf_seconds: i64,
}

impl Default for FreshnessOracle {
    fn default() -> Self {
        Self {
            high_conf_seconds: 48 * 3600,
            medium_conf_seconds: 24 * 3600,
            low_conf_seconds: 6 * 3600,
        }
    }
}

impl FreshnessOracle {
    pub fn suggest_ttl_seconds(&self, confidence: Confidence) -> i64 {
        match confidence {
            Confidence::High => self.high_conf_seconds,
            Confidence::Medium => self.medium_conf_seconds,
            Confidence::Low => self.low_conf_seconds,
        }
    }

    pub fn expiry_timestamp(&self, last_verified: DateTime<Utc>, ttl_seconds: i64) -> DateTime<Utc> {
        last_verified + Duration::seconds(ttl_seconds.max(0))
    }

    /// An entry is stale from the expiry instant onward.
    pub fn is_stale(&self, last_verified: DateTime<Utc>, ttl_seconds: i64, now: DateTime<Utc>) -> bool {
        now >= self.expiry_timestamp(last_verified, ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_scales_with_confidence() {
        let oracle = FreshnessOracle::default();
        assert_eq!(oracle.suggest_ttl_seconds(Confidence::High), 48 * 3600);
        assert_eq!(oracle.suggest_ttl_seconds(Confidence::Medium), 24 * 3600);
        assert_eq!(oracle.suggest_ttl_seconds(Confidence::Low), 6 * 3600);
    }

    #[test]
    fn exactly_at_ttl_is_stale() {
        let oracle = FreshnessOracle::default();
        let verified = Utc::now();
        let at_expiry = verified + Duration::seconds(100);
        assert!(oracle.is_stale(verified, 100, at_expiry));
        assert!(!oracle.is_stale(verified, 100, at_expiry - Duration::seconds(1)));
    }
}
