mod breaker;
mod cache;
mod llm;
mod paths;
mod pipeline;
mod server;
mod tools;

pub use breaker::*;
pub use cache::*;
pub use llm::*;
pub use paths::*;
pub use pipeline::*;
pub use server::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load from a TOML file, then apply environment overrides for the
    /// canonical variable names (`GUIDE_URL`, `MEMORY_ROOT`, …). A missing
    /// file yields the defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the canonical environment variables on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.llm.apply_env_overrides();
        self.paths.apply_env_overrides();
        self.breaker.apply_env_overrides();
        self.pipeline.apply_env_overrides();
    }

    /// Sanity-check the configuration. Errors abort startup; warnings are
    /// logged by the caller.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.planner.base_url.trim().is_empty() {
            issues.push(ConfigIssue::error(
                "llm.planner.base_url is empty — set GUIDE_URL or [llm.planner] base_url",
            ));
        }
        if self.llm.coordinator.base_url.trim().is_empty() {
            issues.push(ConfigIssue::warning(
                "llm.coordinator.base_url is empty — falling back to the planner endpoint",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            issues.push(ConfigIssue::error("breaker.failure_threshold must be >= 1"));
        }
        if self.breaker.success_threshold == 0 {
            issues.push(ConfigIssue::error("breaker.success_threshold must be >= 1"));
        }
        if self.pipeline.reflection.accept_threshold <= self.pipeline.reflection.reject_threshold {
            issues.push(ConfigIssue::error(
                "pipeline.reflection: accept_threshold must exceed reject_threshold",
            ));
        }
        if self.pipeline.agent.max_steps == 0 {
            issues.push(ConfigIssue::error("pipeline.agent.max_steps must be >= 1"));
        }
        if self.cache.hybrid.alpha < 0.0 || self.cache.hybrid.alpha > 1.0 {
            issues.push(ConfigIssue::error("cache.hybrid.alpha must be in [0, 1]"));
        }
        if self.tools.intervention.poll_interval_secs > 2 {
            issues.push(ConfigIssue::warning(
                "tools.intervention.poll_interval_secs > 2 — resolver latency will suffer",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors_with_planner_url() {
        let mut config = Config::default();
        config.llm.planner.base_url = "http://localhost:8000/v1".into();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn inverted_reflection_thresholds_rejected() {
        let mut config = Config::default();
        config.llm.planner.base_url = "http://localhost:8000/v1".into();
        config.pipeline.reflection.accept_threshold = 0.3;
        config.pipeline.reflection.reject_threshold = 0.5;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.breaker.failure_threshold, config.breaker.failure_threshold);
        assert_eq!(back.cache.response.ttl_seconds, config.cache.response.ttl_seconds);
    }
}
