//! Layer 3: shared tool-output cache.
//!
//! Keyed by sha256 of (tool name + normalized args). Shared across
//! sessions; TTL is tool-specific with a 12 h default.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};

use cg_domain::config::CacheLayerConfig;
use cg_domain::tool::ToolOutput;

use crate::entry::CacheEntry;
use crate::layer::CacheLayer;

/// Deterministic cache key for a tool invocation. Argument maps are
/// serialized with sorted keys so equivalent calls collide.
pub fn tool_cache_key(tool: &str, args: &Value) -> String {
    let normalized = normalize_value(args);
    let serialized = serde_json::to_string(&normalized).unwrap_or_default();
    let digest = Sha256::digest(format!("{tool}|{serialized}").as_bytes());
    format!("tool-{}", hex::encode(&digest[..16]))
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // BTreeMap iteration is sorted; rebuilding through it
            // canonicalizes key order at every nesting level.
            let sorted: std::collections::BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), normalize_value(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::String(s) => Value::String(s.trim().to_owned()),
        other => other.clone(),
    }
}

pub struct ToolOutputCache {
    layer: Arc<CacheLayer>,
    default_ttl: i64,
}

impl ToolOutputCache {
    pub fn new(config: &CacheLayerConfig) -> Self {
        Self {
            layer: Arc::new(CacheLayer::new("tool_output", config.max_entries)),
            default_ttl: config.ttl_seconds,
        }
    }

    pub fn layer(&self) -> Arc<CacheLayer> {
        self.layer.clone()
    }

    /// Cache a successful output. Failures are never cached — a failed call
    /// should always be retried fresh.
    pub async fn put(&self, tool: &str, args: &Value, output: &ToolOutput, ttl_override: Option<i64>) {
        if !output.success {
            return;
        }
        let key = tool_cache_key(tool, args);
        let mut entry = CacheEntry::new(
            key,
            serde_json::to_value(output).unwrap_or(Value::Null),
            "general",
            ttl_override.unwrap_or(self.default_ttl),
        );
        entry.quality_score = 0.7;
        entry.intent = Some(tool.to_owned());
        self.layer.upsert(entry).await;
    }

    /// Fresh cached output for an identical invocation, if any.
    pub fn lookup(&self, tool: &str, args: &Value) -> Option<ToolOutput> {
        let key = tool_cache_key(tool, args);
        let entry = self.layer.get(&key)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        serde_json::from_value(entry.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::config::CacheConfig;
    use serde_json::json;

    #[test]
    fn key_is_stable_under_arg_order() {
        let a = tool_cache_key("web.search", &json!({"q": "hamsters", "limit": 5}));
        let b = tool_cache_key("web.search", &json!({"limit": 5, "q": "hamsters"}));
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_per_tool() {
        let args = json!({"q": "hamsters"});
        assert_ne!(tool_cache_key("web.search", &args), tool_cache_key("web.visit", &args));
    }

    #[tokio::test]
    async fn round_trip_and_failure_skip() {
        let cache = ToolOutputCache::new(&CacheConfig::default().tool_output);
        let args = json!({"q": "hamster cages"});

        let ok = ToolOutput::ok("web.search", json!({"results": ["a", "b"]}));
        cache.put("web.search", &args, &ok, None).await;
        let hit = cache.lookup("web.search", &args).unwrap();
        assert!(hit.success);

        let failed = ToolOutput::failed("web.search", "boom");
        cache.put("web.search", &json!({"q": "other"}), &failed, None).await;
        assert!(cache.lookup("web.search", &json!({"q": "other"})).is_none());
    }
}
