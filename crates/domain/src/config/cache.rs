use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache layers & sweeper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-layer tuning (TTL, size cap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLayerConfig {
    pub ttl_seconds: i64,
    pub max_entries: usize,
}

/// Hybrid retrieval thresholds shared by every layer lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Weight of the semantic score in the fusion (`1 - alpha` keyword).
    #[serde(default = "d_alpha")]
    pub alpha: f64,
    #[serde(default = "d_semantic_threshold")]
    pub semantic_threshold: f64,
    #[serde(default = "d_keyword_threshold")]
    pub keyword_threshold: f64,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            alpha: d_alpha(),
            semantic_threshold: d_semantic_threshold(),
            keyword_threshold: d_keyword_threshold(),
            top_k: d_top_k(),
        }
    }
}

fn d_alpha() -> f64 {
    0.7
}

fn d_semantic_threshold() -> f64 {
    0.5
}

fn d_keyword_threshold() -> f64 {
    0.1
}

fn d_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Session-scoped final responses: 6 h TTL.
    #[serde(default = "d_response_layer")]
    pub response: CacheLayerConfig,
    /// Cross-session claims: TTL comes per-claim from confidence; the layer
    /// value is only the cap for entries missing one.
    #[serde(default = "d_claim_layer")]
    pub claims: CacheLayerConfig,
    /// Shared tool outputs: 12 h default TTL.
    #[serde(default = "d_tool_layer")]
    pub tool_output: CacheLayerConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    /// Sweeper cadence.
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Entries below this quality are pruned before size eviction runs.
    #[serde(default = "d_min_quality")]
    pub min_quality_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            response: d_response_layer(),
            claims: d_claim_layer(),
            tool_output: d_tool_layer(),
            hybrid: HybridConfig::default(),
            sweep_interval_seconds: d_sweep_interval(),
            min_quality_threshold: d_min_quality(),
        }
    }
}

fn d_response_layer() -> CacheLayerConfig {
    CacheLayerConfig {
        ttl_seconds: 6 * 3600,
        max_entries: 512,
    }
}

fn d_claim_layer() -> CacheLayerConfig {
    CacheLayerConfig {
        ttl_seconds: 24 * 3600,
        max_entries: 4096,
    }
}

fn d_tool_layer() -> CacheLayerConfig {
    CacheLayerConfig {
        ttl_seconds: 12 * 3600,
        max_entries: 1024,
    }
}

fn d_sweep_interval() -> u64 {
    300
}

fn d_min_quality() -> f64 {
    0.30
}
