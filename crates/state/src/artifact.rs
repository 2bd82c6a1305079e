//! Content-addressed artifact storage.
//!
//! Large tool outputs (tables, JSON responses, HTML) must not be injected
//! into prompts directly. They are stored under a deterministic
//! `blob://<sha256>` identifier and referenced by handle from bundles and
//! capsules. Identical payloads share a single on-disk file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use cg_domain::{Error, Result};

/// Inline preview recorded in metadata for text/json artifacts.
const PREVIEW_LEN: usize = 600;

/// One stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    pub blob_id: String,
    pub path: PathBuf,
    pub kind: String,
    pub size: u64,
    pub sha256: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Append-only, content-addressed blob store.
///
/// Blobs land under `blobs/<first-2-hex>/<sha256>`; every write appends a
/// record to `index.jsonl`. Writes are safe under concurrency because the
/// filename is content-derived — duplicate writes are no-ops. The index
/// append is guarded by a single per-process lock.
pub struct ArtifactStore {
    blob_dir: PathBuf,
    index_path: PathBuf,
    index_lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let blob_dir = base_dir.join("blobs");
        std::fs::create_dir_all(&blob_dir)?;
        Ok(Self {
            blob_dir,
            index_path: base_dir.join("index.jsonl"),
            index_lock: Mutex::new(()),
        })
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Store raw bytes. Idempotent: storing the same payload twice returns
    /// the same `blob_id` and leaves a single file on disk.
    pub fn store_bytes(
        &self,
        data: &[u8],
        kind: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<ArtifactRecord> {
        let sha = hex::encode(Sha256::digest(data));
        let blob_id = format!("blob://{sha}");
        let path = self.path_for_hash(&sha);

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, data)?;
        }

        let record = ArtifactRecord {
            blob_id,
            path,
            kind: kind.to_owned(),
            size: data.len() as u64,
            sha256: sha,
            metadata,
        };
        self.append_index(&record);
        Ok(record)
    }

    /// Store UTF-8 text, recording a short preview in metadata.
    pub fn store_text(&self, text: &str, kind: &str) -> Result<ArtifactRecord> {
        let mut metadata = BTreeMap::new();
        metadata.insert("encoding".to_owned(), Value::String("utf-8".into()));
        if text.len() > PREVIEW_LEN {
            let preview: String = text.chars().take(PREVIEW_LEN).collect();
            metadata.insert("preview".to_owned(), Value::String(format!("{preview}...")));
        }
        self.store_bytes(text.as_bytes(), kind, metadata)
    }

    /// Store a JSON payload in compact form.
    pub fn store_json(&self, payload: &Value, kind: &str) -> Result<ArtifactRecord> {
        let text = serde_json::to_string(payload)?;
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "content_type".to_owned(),
            Value::String("application/json".into()),
        );
        if text.len() > PREVIEW_LEN {
            let preview: String = text.chars().take(PREVIEW_LEN).collect();
            metadata.insert("preview".to_owned(), Value::String(format!("{preview}...")));
        }
        self.store_bytes(text.as_bytes(), kind, metadata)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Return the on-disk path for a `blob://` identifier.
    pub fn resolve_path(&self, blob_id: &str) -> Result<PathBuf> {
        let sha = hash_from_blob(blob_id)?;
        let path = self.path_for_hash(&sha);
        if !path.exists() {
            return Err(Error::ArtifactMissing(blob_id.to_owned()));
        }
        Ok(path)
    }

    pub fn exists(&self, blob_id: &str) -> bool {
        hash_from_blob(blob_id)
            .map(|sha| self.path_for_hash(&sha).exists())
            .unwrap_or(false)
    }

    pub fn read_bytes(&self, blob_id: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.resolve_path(blob_id)?)?)
    }

    pub fn read_text(&self, blob_id: &str) -> Result<String> {
        let bytes = self.read_bytes(blob_id)?;
        String::from_utf8(bytes).map_err(|e| Error::Storage(format!("{blob_id}: {e}")))
    }

    // ── Internal ───────────────────────────────────────────────────

    fn path_for_hash(&self, sha_hex: &str) -> PathBuf {
        let prefix = &sha_hex[..2.min(sha_hex.len())];
        self.blob_dir.join(prefix).join(sha_hex)
    }

    /// Best-effort audit trail: an index write failure never fails the
    /// store — the blob itself is already on disk.
    fn append_index(&self, record: &ArtifactRecord) {
        let _guard = self.index_lock.lock();
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize artifact index record");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, "artifact index append failed");
        }
    }
}

fn hash_from_blob(blob_id: &str) -> Result<String> {
    blob_id
        .strip_prefix("blob://")
        .filter(|sha| !sha.is_empty() && sha.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_owned)
        .ok_or_else(|| Error::Storage(format!("invalid blob id: {blob_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_blob_ids_rejected() {
        assert!(hash_from_blob("sha256:abc").is_err());
        assert!(hash_from_blob("blob://").is_err());
        assert!(hash_from_blob("blob://not-hex!").is_err());
        assert!(hash_from_blob("blob://00ff").is_ok());
    }
}
