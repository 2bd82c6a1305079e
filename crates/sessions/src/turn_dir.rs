//! Per-turn filesystem workspace.
//!
//! Every turn gets a directory under the transcripts root holding its typed
//! documents. Created at turn start, sealed with a manifest on completion,
//! referenced by audit afterwards. Phases communicate only through these
//! documents.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use cg_domain::{Error, Result};

/// Canonical document names. Free-form names are allowed (tool_calls/…),
/// but the pipeline goes through these.
pub struct TurnDocs;

impl TurnDocs {
    pub const USER_QUERY: &'static str = "user_query.md";
    pub const CONTEXT: &'static str = "context.md";
    pub const CONTEXT_SOURCES: &'static str = "context_sources.json";
    pub const INTENT: &'static str = "intent.json";
    pub const META_REFLECTION: &'static str = "meta_reflection.md";
    pub const CACHE_DECISION: &'static str = "cache_decision.json";
    pub const PLAN: &'static str = "plan.json";
    pub const BUNDLE: &'static str = "bundle.json";
    pub const CAPSULE: &'static str = "capsule.json";
    pub const ANSWER: &'static str = "answer.md";
    pub const TURN_SUMMARY: &'static str = "turn_summary.json";
    pub const MEMORY_WRITES: &'static str = "memory_writes.json";
    pub const MANIFEST: &'static str = "manifest.json";
}

#[derive(Debug, Clone, Serialize)]
struct ManifestEntry {
    name: String,
    bytes: u64,
    modified: String,
}

pub struct TurnDirectory {
    trace_id: String,
    root: PathBuf,
    sealed: parking_lot::Mutex<bool>,
}

impl TurnDirectory {
    /// Allocate a fresh turn directory under `transcripts_root`.
    pub fn allocate(transcripts_root: &Path) -> Result<Self> {
        let trace_id = format!(
            "turn-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let root = transcripts_root.join(&trace_id);
        std::fs::create_dir_all(root.join("tool_calls"))?;
        Ok(Self {
            trace_id,
            root,
            sealed: parking_lot::Mutex::new(false),
        })
    }

    /// Open an existing turn directory (audit / tests).
    pub fn open(transcripts_root: &Path, trace_id: &str) -> Result<Self> {
        let root = transcripts_root.join(trace_id);
        if !root.is_dir() {
            return Err(Error::Storage(format!("turn directory missing: {trace_id}")));
        }
        Ok(Self {
            trace_id: trace_id.to_owned(),
            root,
            sealed: parking_lot::Mutex::new(true),
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn doc_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Write a text document. Rejected after sealing — a sealed turn is
    /// immutable.
    pub fn write_text(&self, name: &str, content: &str) -> Result<PathBuf> {
        if *self.sealed.lock() {
            return Err(Error::Storage(format!(
                "turn {} is sealed; refusing write of {name}",
                self.trace_id
            )));
        }
        let path = self.doc_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let raw = serde_json::to_string_pretty(value)?;
        self.write_text(name, &raw)
    }

    /// Record one tool invocation under `tool_calls/step_NN_<tool>.json`.
    pub fn write_tool_call(&self, step: usize, tool: &str, record: &Value) -> Result<PathBuf> {
        let safe_tool = tool.replace('.', "_");
        self.write_json(&format!("tool_calls/step_{step:02}_{safe_tool}.json"), record)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn read_text(&self, name: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.doc_path(name))?)
    }

    pub fn read_json(&self, name: &str) -> Result<Value> {
        Ok(serde_json::from_str(&self.read_text(name)?)?)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.doc_path(name).exists()
    }

    // ── Sealing ────────────────────────────────────────────────────

    /// Seal the turn: write the manifest listing every document, then
    /// refuse further writes. Idempotent.
    pub fn seal(&self, status: &str) -> Result<()> {
        {
            let sealed = self.sealed.lock();
            if *sealed {
                return Ok(());
            }
        }

        let mut entries = Vec::new();
        collect_entries(&self.root, &self.root, &mut entries)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let manifest = serde_json::json!({
            "trace_id": self.trace_id,
            "status": status,
            "sealed_at": Utc::now().to_rfc3339(),
            "documents": entries,
        });
        self.write_json(TurnDocs::MANIFEST, &manifest)?;
        *self.sealed.lock() = true;
        tracing::debug!(trace_id = %self.trace_id, status, "turn sealed");
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        *self.sealed.lock()
    }
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<ManifestEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_entries(root, &path, out)?;
        } else {
            let metadata = entry.metadata()?;
            let modified: chrono::DateTime<Utc> = metadata
                .modified()
                .map(Into::into)
                .unwrap_or_else(|_| Utc::now());
            out.push(ManifestEntry {
                name: path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned(),
                bytes: metadata.len(),
                modified: modified.to_rfc3339(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_seal_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let turn = TurnDirectory::allocate(root.path()).unwrap();
        assert!(!turn.is_sealed());

        turn.write_text(TurnDocs::USER_QUERY, "find hamsters").unwrap();
        turn.write_json(TurnDocs::INTENT, &serde_json::json!({"intent": "find"}))
            .unwrap();
        turn.write_tool_call(1, "web.search", &serde_json::json!({"ok": true}))
            .unwrap();

        turn.seal("completed").unwrap();
        assert!(turn.is_sealed());

        let manifest = turn.read_json(TurnDocs::MANIFEST).unwrap();
        let docs = manifest["documents"].as_array().unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"user_query.md"));
        assert!(names.iter().any(|n| n.starts_with("tool_calls/step_01")));
    }

    #[test]
    fn sealed_turn_refuses_writes() {
        let root = tempfile::tempdir().unwrap();
        let turn = TurnDirectory::allocate(root.path()).unwrap();
        turn.write_text(TurnDocs::ANSWER, "done").unwrap();
        turn.seal("completed").unwrap();
        assert!(turn.write_text("late.md", "nope").is_err());
        // Seal again is a no-op.
        turn.seal("completed").unwrap();
    }

    #[test]
    fn reopen_existing_turn() {
        let root = tempfile::tempdir().unwrap();
        let turn = TurnDirectory::allocate(root.path()).unwrap();
        turn.write_text(TurnDocs::ANSWER, "the answer").unwrap();
        turn.seal("completed").unwrap();
        let trace_id = turn.trace_id().to_owned();

        let reopened = TurnDirectory::open(root.path(), &trace_id).unwrap();
        assert_eq!(reopened.read_text(TurnDocs::ANSWER).unwrap(), "the answer");
        assert!(reopened.is_sealed());
    }
}
