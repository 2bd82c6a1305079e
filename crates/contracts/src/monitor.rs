//! Contract-violation monitor: a bounded ring of recent violations plus
//! per-component repair-success rates.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// Ring capacity; older violations fall off the back.
const MAX_VIOLATIONS: usize = 100;
/// Raw-payload preview recorded per violation.
const PREVIEW_LEN: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub component: String,
    pub contract: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub repaired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_strategy: Option<String>,
    pub raw_data_preview: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSummary {
    pub total_violations: u64,
    /// component → (attempts, successes, success rate in percent).
    pub repair_success_rate: HashMap<String, f64>,
    pub recent: Vec<ViolationRecord>,
}

#[derive(Default)]
pub struct ContractMonitor {
    violations: RwLock<VecDeque<ViolationRecord>>,
    attempts: RwLock<HashMap<String, u64>>,
    successes: RwLock<HashMap<String, u64>>,
    total: RwLock<u64>,
}

impl ContractMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        component: &str,
        contract: &str,
        error: &str,
        raw_data: &Value,
        repaired: bool,
        repair_strategy: Option<&str>,
    ) {
        let preview: String = raw_data.to_string().chars().take(PREVIEW_LEN).collect();
        tracing::warn!(
            component,
            contract,
            repaired,
            strategy = repair_strategy.unwrap_or("none"),
            "contract violation: {error}"
        );

        let record = ViolationRecord {
            component: component.to_owned(),
            contract: contract.to_owned(),
            error: error.to_owned(),
            timestamp: Utc::now(),
            repaired,
            repair_strategy: repair_strategy.map(str::to_owned),
            raw_data_preview: preview,
        };

        {
            let mut ring = self.violations.write();
            ring.push_back(record);
            while ring.len() > MAX_VIOLATIONS {
                ring.pop_front();
            }
        }
        *self.total.write() += 1;
        *self.attempts.write().entry(component.to_owned()).or_insert(0) += 1;
        if repaired {
            *self.successes.write().entry(component.to_owned()).or_insert(0) += 1;
        }
    }

    pub fn summary(&self) -> MonitorSummary {
        let attempts = self.attempts.read();
        let successes = self.successes.read();
        let repair_success_rate = attempts
            .iter()
            .map(|(component, count)| {
                let ok = successes.get(component).copied().unwrap_or(0);
                let rate = if *count == 0 {
                    100.0
                } else {
                    (ok as f64 / *count as f64 * 1000.0).round() / 10.0
                };
                (component.clone(), rate)
            })
            .collect();

        let ring = self.violations.read();
        MonitorSummary {
            total_violations: *self.total.read(),
            repair_success_rate,
            recent: ring.iter().rev().take(10).cloned().collect(),
        }
    }

    pub fn clear(&self) {
        self.violations.write().clear();
        self.attempts.write().clear();
        self.successes.write().clear();
        *self.total.write() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_is_bounded() {
        let monitor = ContractMonitor::new();
        for i in 0..150 {
            monitor.record("guide", "GuideResponse", &format!("e{i}"), &json!({}), true, None);
        }
        let summary = monitor.summary();
        assert_eq!(summary.total_violations, 150);
        assert_eq!(monitor.violations.read().len(), 100);
        // Most recent first.
        assert_eq!(summary.recent[0].error, "e149");
    }

    #[test]
    fn success_rate_reflects_repairs() {
        let monitor = ContractMonitor::new();
        monitor.record("coordinator", "Plan", "bad", &json!({}), true, Some("x"));
        monitor.record("coordinator", "Plan", "worse", &json!({}), false, None);
        let summary = monitor.summary();
        assert_eq!(summary.repair_success_rate["coordinator"], 50.0);
    }
}
