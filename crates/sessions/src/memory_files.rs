//! Long-term memory file layout.
//!
//! ```text
//! <memory_root>/
//!   user_preferences.md
//!   user_facts.md
//!   system_learnings.md
//!   domain_knowledge.md
//!   lessons/*.md
//! ```
//!
//! The summarizer appends `MemoryWrite`s to these documents; the context
//! builder reads them back. Placeholder files (a `_No …_` stub under 500
//! chars) are treated as absent.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cg_domain::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryDocKind {
    UserPreferences,
    UserFacts,
    SystemLearnings,
    DomainKnowledge,
}

impl MemoryDocKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            MemoryDocKind::UserPreferences => "user_preferences.md",
            MemoryDocKind::UserFacts => "user_facts.md",
            MemoryDocKind::SystemLearnings => "system_learnings.md",
            MemoryDocKind::DomainKnowledge => "domain_knowledge.md",
        }
    }

    pub fn all() -> [MemoryDocKind; 4] {
        [
            MemoryDocKind::UserPreferences,
            MemoryDocKind::UserFacts,
            MemoryDocKind::SystemLearnings,
            MemoryDocKind::DomainKnowledge,
        ]
    }
}

/// One append produced by the summarizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryWrite {
    pub doc_type: MemoryDocKind,
    pub section: String,
    pub entry: String,
    pub confidence: f64,
    pub source: String,
}

pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("lessons"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a memory document. Placeholder stubs count as absent.
    pub fn read_doc(&self, kind: MemoryDocKind) -> Option<String> {
        let path = self.root.join(kind.file_name());
        let content = std::fs::read_to_string(path).ok()?;
        if content.contains("_No ") && content.len() < 500 {
            return None;
        }
        Some(content)
    }

    /// All lesson files, name → content, sorted by name.
    pub fn read_lessons(&self) -> Vec<(String, String)> {
        let lessons_dir = self.root.join("lessons");
        let Ok(entries) = std::fs::read_dir(&lessons_dir) else {
            return Vec::new();
        };
        let mut lessons: Vec<(String, String)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .filter_map(|e| {
                let name = e.path().file_stem()?.to_string_lossy().into_owned();
                let content = std::fs::read_to_string(e.path()).ok()?;
                Some((name, content))
            })
            .collect();
        lessons.sort_by(|a, b| a.0.cmp(&b.0));
        lessons
    }

    /// Append one write under its section header, creating the document
    /// (and the section) as needed.
    pub fn apply_write(&self, write: &MemoryWrite) -> Result<()> {
        let path = self.root.join(write.doc_type.file_name());
        let existing = std::fs::read_to_string(&path).unwrap_or_default();

        let stamp = Utc::now().format("%Y-%m-%d");
        let line = format!(
            "- {} _(confidence: {:.2}, source: {}, {stamp})_\n",
            write.entry.trim(),
            write.confidence,
            write.source
        );

        let header = format!("## {}", write.section.trim());
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        if existing.contains(&header) {
            // Section exists: append at the end of the file; readers group
            // by bullet content, not position.
            write!(file, "{line}")?;
        } else {
            let lead = if existing.is_empty() || existing.ends_with('\n') {
                ""
            } else {
                "\n"
            };
            write!(file, "{lead}\n{header}\n{line}")?;
        }
        Ok(())
    }

    pub fn apply_writes(&self, writes: &[MemoryWrite]) -> Result<usize> {
        let mut applied = 0;
        for write in writes {
            self.apply_write(write)?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn apply_write_creates_section() {
        let (_dir, store) = store();
        store
            .apply_write(&MemoryWrite {
                doc_type: MemoryDocKind::UserPreferences,
                section: "Shopping".into(),
                entry: "prefers EU retailers".into(),
                confidence: 0.9,
                source: "turn-1".into(),
            })
            .unwrap();

        let content = store.read_doc(MemoryDocKind::UserPreferences).unwrap();
        assert!(content.contains("## Shopping"));
        assert!(content.contains("prefers EU retailers"));
    }

    #[test]
    fn placeholder_docs_read_as_absent() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join("user_facts.md"),
            "_No user facts recorded yet._\n",
        )
        .unwrap();
        assert!(store.read_doc(MemoryDocKind::UserFacts).is_none());
    }

    #[test]
    fn lessons_are_sorted() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("lessons/b_lesson.md"), "b").unwrap();
        std::fs::write(dir.path().join("lessons/a_lesson.md"), "a").unwrap();
        let lessons = store.read_lessons();
        assert_eq!(lessons[0].0, "a_lesson");
        assert_eq!(lessons.len(), 2);
    }
}
