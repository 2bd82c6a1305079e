//! Human-intervention protocol.
//!
//! When the tool plane hits a blocker (CAPTCHA, login wall, rate limit,
//! bot check) it files an `InterventionRequest` and waits. Two resolution
//! paths are polled together:
//!
//! 1. in-process signaling (`resolve` fires a oneshot), and
//! 2. a shared file queue (`captcha_queue.json`) from which an external
//!    resolver removes the entry; the waiter detects the removal by polling
//!    at most every 2 seconds.
//!
//! After the timeout (default 90 s) the request is marked unresolved and
//! the calling tool returns a blocked result — never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use cg_domain::config::InterventionConfig;
use cg_domain::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    Captcha,
    LoginWall,
    RateLimit,
    BotCheck,
    /// Out-of-band user approval for a gated tool operation.
    Approval,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionRequest {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: InterventionType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    pub session_id: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InterventionRequest {
    pub fn new(kind: InterventionType, url: impl Into<String>, session_id: impl Into<String>) -> Self {
        let url = url.into();
        let domain = url
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("")
            .to_owned();
        Self {
            id: Uuid::new_v4(),
            kind,
            url,
            screenshot_path: None,
            session_id: session_id.into(),
            domain,
            cdp_url: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterventionOutcome {
    /// A resolver acted; `note` carries any in-process payload.
    Resolved { note: Option<String> },
    /// Timeout expired with no resolution; the caller resumes with no new
    /// state.
    Unresolved,
}

/// Shape of the shared queue file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    pending: Vec<InterventionRequest>,
}

pub struct InterventionStore {
    queue_path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Option<String>>>>,
}

impl InterventionStore {
    pub fn new(queue_path: impl Into<PathBuf>, config: &InterventionConfig) -> Self {
        Self {
            queue_path: queue_path.into(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            poll_interval: Duration::from_secs(config.poll_interval_secs.clamp(1, 2)),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    // ── Queue file helpers ─────────────────────────────────────────

    fn read_queue(&self) -> QueueFile {
        std::fs::read_to_string(&self.queue_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write_queue(&self, queue: &QueueFile) -> Result<()> {
        if let Some(parent) = self.queue_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(queue)?;
        std::fs::write(&self.queue_path, raw)?;
        Ok(())
    }

    // ── Protocol ───────────────────────────────────────────────────

    /// File a request: append to the shared queue and register the
    /// in-process waiter.
    pub fn submit(&self, request: InterventionRequest) -> Result<oneshot::Receiver<Option<String>>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.read_queue();
            queue.pending.push(request.clone());
            self.write_queue(&queue)?;
        }
        self.waiters.lock().insert(request.id, tx);
        tracing::warn!(
            id = %request.id,
            kind = ?request.kind,
            url = %request.url,
            "intervention requested; awaiting human resolution"
        );
        Ok(rx)
    }

    /// In-process resolution path (e.g. the HTTP resolve endpoint). Also
    /// removes the entry from the file queue. Returns false for unknown ids.
    pub fn resolve(&self, id: &Uuid, note: Option<String>) -> bool {
        let mut queue = self.read_queue();
        let before = queue.pending.len();
        queue.pending.retain(|r| r.id != *id);
        let removed = queue.pending.len() != before;
        if removed {
            if let Err(e) = self.write_queue(&queue) {
                tracing::warn!(error = %e, "failed to update intervention queue file");
            }
        }

        match self.waiters.lock().remove(id) {
            Some(tx) => {
                let _ = tx.send(note);
                true
            }
            None => removed,
        }
    }

    pub fn list_pending(&self) -> Vec<InterventionRequest> {
        self.read_queue().pending
    }

    /// Wait for either resolution path, bounded by the timeout.
    pub async fn await_resolution(
        &self,
        id: Uuid,
        mut rx: oneshot::Receiver<Option<String>>,
    ) -> InterventionOutcome {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            // Path 1: in-process signal.
            match rx.try_recv() {
                Ok(note) => return InterventionOutcome::Resolved { note },
                Err(oneshot::error::TryRecvError::Closed) => {
                    return InterventionOutcome::Resolved { note: None };
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            // Path 2: the file queue no longer lists the request.
            if !self.read_queue().pending.iter().any(|r| r.id == id) {
                self.waiters.lock().remove(&id);
                return InterventionOutcome::Resolved { note: None };
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - tokio::time::Instant::now())).await;
        }

        // Timed out: drop the waiter and leave a marker for audit.
        self.waiters.lock().remove(&id);
        tracing::warn!(id = %id, "intervention unresolved after timeout");
        InterventionOutcome::Unresolved
    }

    /// Convenience wrapper: submit + await in one call. The `Blocked` error
    /// is only for submission failures, not timeouts.
    pub async fn request_and_wait(&self, request: InterventionRequest) -> Result<InterventionOutcome> {
        let id = request.id;
        let rx = self
            .submit(request)
            .map_err(|e| Error::Blocked(format!("failed to file intervention: {e}")))?;
        Ok(self.await_resolution(id, rx).await)
    }
}
