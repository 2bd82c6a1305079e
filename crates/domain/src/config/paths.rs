use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filesystem roots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Long-term memory documents (`user_preferences.md`, `lessons/`, …).
    #[serde(default = "d_memory_root")]
    pub memory_root: PathBuf,
    /// Per-turn directories, one per trace id.
    #[serde(default = "d_transcripts")]
    pub transcripts_dir: PathBuf,
    /// Shared-state backbone: artifact blobs, claim registry, caches.
    #[serde(default = "d_shared_state")]
    pub shared_state_dir: PathBuf,
    /// Prompt fragments referenced by recipes.
    #[serde(default = "d_prompts")]
    pub prompts_dir: PathBuf,
    /// Recipe YAML files.
    #[serde(default = "d_recipes")]
    pub recipes_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            memory_root: d_memory_root(),
            transcripts_dir: d_transcripts(),
            shared_state_dir: d_shared_state(),
            prompts_dir: d_prompts(),
            recipes_dir: d_recipes(),
        }
    }
}

fn d_memory_root() -> PathBuf {
    PathBuf::from("data/memory")
}

fn d_transcripts() -> PathBuf {
    PathBuf::from("data/transcripts")
}

fn d_shared_state() -> PathBuf {
    PathBuf::from("data/shared_state")
}

fn d_prompts() -> PathBuf {
    PathBuf::from("prompts")
}

fn d_recipes() -> PathBuf {
    PathBuf::from("recipes")
}

impl PathsConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MEMORY_ROOT") {
            self.memory_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TRANSCRIPTS_DIR") {
            self.transcripts_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SHARED_STATE_DIR") {
            self.shared_state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PROMPTS_DIR") {
            self.prompts_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RECIPES_DIR") {
            self.recipes_dir = PathBuf::from(v);
        }
    }

    /// Artifact store root under the shared-state dir.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.shared_state_dir.join("artifacts")
    }

    /// SQLite database holding claims and topics.
    pub fn knowledge_db(&self) -> PathBuf {
        self.shared_state_dir.join("knowledge.db")
    }

    /// Session ledgers (append-only JSONL per session).
    pub fn ledger_dir(&self) -> PathBuf {
        self.shared_state_dir.join("ledger")
    }

    /// Pending-intervention queue file shared with resolvers.
    pub fn intervention_queue(&self) -> PathBuf {
        self.shared_state_dir.join("captcha_queue.json")
    }
}
