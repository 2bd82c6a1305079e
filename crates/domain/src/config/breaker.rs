use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker tunables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared tunables for both breaker instances (LLM endpoints and tool
/// categories).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the window before a circuit opens.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successes required to close from HALF_OPEN.
    #[serde(default = "d_success_threshold")]
    pub success_threshold: u32,
    /// Sliding window the failure count applies to.
    #[serde(default = "d_window")]
    pub window_seconds: u64,
    /// Seconds an OPEN circuit waits before allowing a HALF_OPEN probe.
    #[serde(default = "d_recovery")]
    pub recovery_timeout: u64,
    /// Size of the recent-calls ring used for the success-rate status.
    #[serde(default = "d_ring")]
    pub ring_size: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            success_threshold: d_success_threshold(),
            window_seconds: d_window(),
            recovery_timeout: d_recovery(),
            ring_size: d_ring(),
        }
    }
}

fn d_failure_threshold() -> u32 {
    3
}

fn d_success_threshold() -> u32 {
    2
}

fn d_window() -> u64 {
    300
}

fn d_recovery() -> u64 {
    60
}

fn d_ring() -> usize {
    10
}

impl BreakerConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("failure_threshold") {
            if let Ok(n) = v.parse() {
                self.failure_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("success_threshold") {
            if let Ok(n) = v.parse() {
                self.success_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("window_seconds") {
            if let Ok(n) = v.parse() {
                self.window_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("recovery_timeout") {
            if let Ok(n) = v.parse() {
                self.recovery_timeout = n;
            }
        }
    }
}
