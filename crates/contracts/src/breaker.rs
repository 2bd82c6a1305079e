//! Per-component circuit breakers.
//!
//! ```text
//! CLOSED --(failures >= failure_threshold in window)--> OPEN
//! OPEN --(recovery timeout elapsed)--> HALF_OPEN
//! HALF_OPEN --(successes >= success_threshold)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! ```
//!
//! Two instances exist in the system: one keyed by LLM endpoint role, one by
//! tool category. Decision reads may be slightly stale — a stale CLOSED read
//! just fails and updates the counters.

use std::collections::{HashMap, VecDeque};
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use cg_domain::config::BreakerConfig;
use cg_domain::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct ComponentState {
    state: CircuitState,
    /// Timestamps of failures inside the sliding window.
    failures: VecDeque<DateTime<Utc>>,
    half_open_successes: u32,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Recent call outcomes, newest last, bounded by `ring_size`.
    recent: VecDeque<bool>,
}

/// Snapshot reported by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub component: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub half_open_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Success percentage over the recent-calls ring (100 when empty).
    pub success_rate: f64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    components: Mutex<HashMap<String, ComponentState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` under breaker protection. Rejects immediately with
    /// `Error::CircuitOpen` while the component's circuit is OPEN and the
    /// recovery timeout has not elapsed; otherwise forwards the operation's
    /// own error and records the outcome.
    pub async fn call<T, F, Fut>(&self, component: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check(component)?;
        match op().await {
            Ok(value) => {
                self.record_success(component);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(component, &e.to_string());
                Err(e)
            }
        }
    }

    /// Reject or admit a call right now. OPEN circuits flip to HALF_OPEN
    /// once the recovery timeout has elapsed (the caller becomes the probe).
    pub fn check(&self, component: &str) -> Result<()> {
        let mut components = self.components.lock();
        let entry = components.entry(component.to_owned()).or_default();

        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = entry
                    .last_failure
                    .map(|at| Utc::now() - at)
                    .unwrap_or_else(Duration::zero);
                if elapsed > Duration::seconds(self.config.recovery_timeout as i64) {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_successes = 0;
                    tracing::info!(component, "circuit half-open (probing recovery)");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        component: component.to_owned(),
                        last_error: entry.last_error.clone(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self, component: &str) {
        let mut components = self.components.lock();
        let entry = components.entry(component.to_owned()).or_default();
        push_recent(&mut entry.recent, true, self.config.ring_size);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.half_open_successes += 1;
                if entry.half_open_successes >= self.config.success_threshold {
                    entry.state = CircuitState::Closed;
                    entry.failures.clear();
                    entry.half_open_successes = 0;
                    tracing::info!(component, "circuit closed (recovered)");
                }
            }
            CircuitState::Closed => {
                // Success in CLOSED clears the failure streak.
                entry.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, component: &str, error: &str) {
        let now = Utc::now();
        let mut components = self.components.lock();
        let entry = components.entry(component.to_owned()).or_default();
        push_recent(&mut entry.recent, false, self.config.ring_size);
        entry.last_failure = Some(now);
        entry.last_error = Some(error.to_owned());

        match entry.state {
            CircuitState::Closed => {
                entry.failures.push_back(now);
                let window_start = now - Duration::seconds(self.config.window_seconds as i64);
                while entry.failures.front().is_some_and(|t| *t < window_start) {
                    entry.failures.pop_front();
                }
                if entry.failures.len() >= self.config.failure_threshold as usize {
                    entry.state = CircuitState::Open;
                    tracing::error!(
                        component,
                        failures = entry.failures.len(),
                        last_error = error,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.half_open_successes = 0;
                tracing::warn!(component, "probe failed; circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self, component: &str) -> CircuitState {
        self.components
            .lock()
            .get(component)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    pub fn status(&self) -> Vec<CircuitStatus> {
        let components = self.components.lock();
        let mut statuses: Vec<CircuitStatus> = components
            .iter()
            .map(|(name, entry)| {
                let success_rate = if entry.recent.is_empty() {
                    100.0
                } else {
                    entry.recent.iter().filter(|ok| **ok).count() as f64
                        / entry.recent.len() as f64
                        * 100.0
                };
                CircuitStatus {
                    component: name.clone(),
                    state: entry.state,
                    failure_count: entry.failures.len(),
                    half_open_successes: entry.half_open_successes,
                    last_error: entry.last_error.clone(),
                    success_rate: (success_rate * 10.0).round() / 10.0,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.component.cmp(&b.component));
        statuses
    }

    /// Manual reset (tests, operator recovery). `None` resets everything.
    pub fn reset(&self, component: Option<&str>) {
        let mut components = self.components.lock();
        match component {
            Some(name) => {
                components.remove(name);
                tracing::info!(component = name, "circuit manually reset");
            }
            None => {
                components.clear();
                tracing::info!("all circuits manually reset");
            }
        }
    }
}

fn push_recent(ring: &mut VecDeque<bool>, outcome: bool, cap: usize) {
    ring.push_back(outcome);
    while ring.len() > cap.max(1) {
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default())
    }

    #[test]
    fn threshold_minus_one_stays_closed() {
        let b = breaker();
        b.record_failure("web", "e1");
        b.record_failure("web", "e2");
        assert_eq!(b.state("web"), CircuitState::Closed);
        b.record_failure("web", "e3");
        assert_eq!(b.state("web"), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_resets_streak() {
        let b = breaker();
        b.record_failure("web", "e1");
        b.record_failure("web", "e2");
        b.record_success("web");
        b.record_failure("web", "e3");
        b.record_failure("web", "e4");
        assert_eq!(b.state("web"), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_with_circuit_open_error() {
        let b = breaker();
        for i in 0..3 {
            b.record_failure("llm", &format!("e{i}"));
        }
        let err = b.check("llm").unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }

    #[test]
    fn half_open_closes_after_successes_and_reopens_on_failure() {
        let config = BreakerConfig {
            recovery_timeout: 0,
            ..BreakerConfig::default()
        };
        let b = CircuitBreaker::new(config);
        for i in 0..3 {
            b.record_failure("tools", &format!("e{i}"));
        }
        assert_eq!(b.state("tools"), CircuitState::Open);

        // recovery_timeout = 0: the next check admits a probe.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(b.check("tools").is_ok());
        assert_eq!(b.state("tools"), CircuitState::HalfOpen);

        b.record_success("tools");
        assert_eq!(b.state("tools"), CircuitState::HalfOpen);
        b.record_success("tools");
        assert_eq!(b.state("tools"), CircuitState::Closed);

        // Re-open path: any failure in HALF_OPEN.
        for i in 0..3 {
            b.record_failure("tools", &format!("e{i}"));
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(b.check("tools").is_ok());
        b.record_failure("tools", "probe failed");
        assert_eq!(b.state("tools"), CircuitState::Open);
    }

    #[test]
    fn status_reports_success_rate() {
        let b = breaker();
        b.record_success("web");
        b.record_failure("web", "e");
        let status = b.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].success_rate, 50.0);
    }

    #[test]
    fn reset_clears_state() {
        let b = breaker();
        for i in 0..3 {
            b.record_failure("web", &format!("e{i}"));
        }
        b.reset(Some("web"));
        assert_eq!(b.state("web"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn call_wrapper_counts_outcomes() {
        let b = breaker();
        let ok: Result<u32> = b.call("llm", || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..3 {
            let _: Result<u32> = b
                .call("llm", || async { Err(Error::Http("boom".into())) })
                .await;
        }
        assert_eq!(b.state("llm"), CircuitState::Open);

        // Rejected before the op runs.
        let rejected: Result<u32> = b.call("llm", || async { Ok(1) }).await;
        assert!(matches!(rejected.unwrap_err(), Error::CircuitOpen { .. }));
    }
}
