use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Maximum inline preview carried by a bundle item. Anything larger lives in
/// the artifact store and is referenced by `blob_id`.
pub const PREVIEW_MAX_CHARS: usize = 400;

/// One piece of evidence gathered during execution.
///
/// `handle` is the stable citation key capsule claims point at; `blob_id`
/// (when present) must resolve in the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawBundleItem {
    pub handle: String,
    pub kind: BundleItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BundleItemKind {
    DocExcerpt,
    Memory,
    ToolOutput,
}

impl RawBundleItem {
    pub fn validate(&self) -> Result<()> {
        if self.handle.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "coordinator".into(),
                detail: "bundle item handle cannot be blank".into(),
            });
        }
        if let Some(blob_id) = &self.blob_id {
            if !blob_id.starts_with("blob://") {
                return Err(Error::ContractViolation {
                    component: "coordinator".into(),
                    detail: format!("blob_id must use blob:// prefix, got {blob_id}"),
                });
            }
        }
        if let Some(preview) = &self.preview {
            if preview.chars().count() > PREVIEW_MAX_CHARS {
                return Err(Error::ContractViolation {
                    component: "coordinator".into(),
                    detail: format!(
                        "preview exceeds {PREVIEW_MAX_CHARS} chars for handle {}",
                        self.handle
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Completion status of a bundle (or of the capsule/envelope distilled
/// from it).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    #[default]
    Ok,
    Empty,
    Error,
    Conflict,
    /// Contract repair salvaged only part of the payload; some claims
    /// survived, the rest were dropped.
    Partial,
}

/// Token/latency usage accumulated while assembling a bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Coordinator output after tool execution, pre-verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawBundle {
    #[serde(rename = "_type", default = "bundle_tag")]
    pub type_tag: String,
    pub ticket_id: String,
    #[serde(default)]
    pub status: BundleStatus,
    #[serde(default)]
    pub items: Vec<RawBundleItem>,
    #[serde(default)]
    pub notes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<BundleUsage>,
}

fn bundle_tag() -> String {
    "BUNDLE".to_owned()
}

impl RawBundle {
    pub fn new(ticket_id: impl Into<String>) -> Self {
        Self {
            type_tag: bundle_tag(),
            ticket_id: ticket_id.into(),
            status: BundleStatus::Ok,
            items: Vec::new(),
            notes: BTreeMap::new(),
            usage: None,
        }
    }

    /// Look up an item by its citation handle.
    pub fn item(&self, handle: &str) -> Option<&RawBundleItem> {
        self.items.iter().find(|i| i.handle == handle)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticket_id.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "coordinator".into(),
                detail: "bundle ticket_id is required".into(),
            });
        }
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(handle: &str) -> RawBundleItem {
        RawBundleItem {
            handle: handle.into(),
            kind: BundleItemKind::ToolOutput,
            summary: Some("search results".into()),
            blob_id: Some("blob://abc123".into()),
            preview: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn serde_round_trip() {
        let mut bundle = RawBundle::new("t-1");
        bundle.items.push(item("h1"));
        let json = serde_json::to_string(&bundle).unwrap();
        let back: RawBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(bundle, back);
        assert!(json.contains("\"_type\":\"BUNDLE\""));
    }

    #[test]
    fn bad_blob_prefix_rejected() {
        let mut bad = item("h1");
        bad.blob_id = Some("file:///tmp/x".into());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn lookup_by_handle() {
        let mut bundle = RawBundle::new("t-1");
        bundle.items.push(item("h1"));
        bundle.items.push(item("h2"));
        assert!(bundle.item("h2").is_some());
        assert!(bundle.item("h3").is_none());
    }
}
