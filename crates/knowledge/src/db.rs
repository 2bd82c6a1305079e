//! Shared SQLite handle for the knowledge store.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use cg_domain::{Error, Result};
use cg_state::EmbeddingService;

use crate::registry::ClaimRegistry;
use crate::topics::TopicIndex;

/// Owner of the knowledge database. Claims and topics live in the same file
/// so topic matches can report claim counts cheaply.
///
/// Writes go through one mutex (single-writer); WAL mode keeps concurrent
/// readers from blocking on the writer.
pub struct KnowledgeDb {
    conn: Arc<Mutex<Connection>>,
}

impl KnowledgeDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(sql_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn claims(&self) -> ClaimRegistry {
        ClaimRegistry::new(self.conn.clone())
    }

    pub fn topics(&self, embedder: Arc<EmbeddingService>) -> TopicIndex {
        TopicIndex::new(self.conn.clone(), embedder)
    }
}

pub(crate) fn sql_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("sqlite: {e}"))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            claim_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            topic_id TEXT,
            claim_type TEXT NOT NULL,
            statement TEXT NOT NULL,
            evidence_handles TEXT NOT NULL,
            confidence TEXT NOT NULL,
            embedding TEXT NOT NULL,
            last_verified TEXT NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            times_reused INTEGER NOT NULL DEFAULT 0,
            times_helpful INTEGER NOT NULL DEFAULT 0,
            user_feedback_score REAL NOT NULL DEFAULT 0.5,
            deprecated INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_claims_session ON claims(session_id);
        CREATE INDEX IF NOT EXISTS idx_claims_topic ON claims(topic_id);
        CREATE INDEX IF NOT EXISTS idx_claims_type ON claims(claim_type);

        CREATE TABLE IF NOT EXISTS topics (
            topic_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            topic_name TEXT NOT NULL,
            topic_slug TEXT NOT NULL,
            parent_id TEXT,
            embedding TEXT NOT NULL,
            retailers TEXT NOT NULL,
            price_range TEXT,
            key_specs TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_accessed TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_topics_session ON topics(session_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_topics_slug ON topics(session_id, topic_slug);
        "#,
    )
    .map_err(sql_err)?;
    Ok(())
}
