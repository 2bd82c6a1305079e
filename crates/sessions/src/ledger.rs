//! Append-only JSONL session ledger.
//!
//! Each session gets a `<session_id>.jsonl` file; every turn lifecycle
//! event is appended as one JSON line, timestamped at append. Readers may
//! lag the tail but never observe reordering.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::Result;

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl LedgerEvent {
    pub fn new(event: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            trace_id: trace_id.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub struct SessionLedger {
    base_dir: PathBuf,
    append_lock: Mutex<()>,
}

impl SessionLedger {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            append_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    pub fn append(&self, session_id: &str, event: LedgerEvent) -> Result<()> {
        let line = serde_json::to_string(&event)?;
        let _guard = self.append_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read a session's events in append order, skipping malformed lines.
    pub fn read(&self, session_id: &str) -> Result<Vec<LedgerEvent>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<LedgerEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed ledger line");
                }
            }
        }
        Ok(events)
    }
}
