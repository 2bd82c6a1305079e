//! Live per-session context: mutable facts, preferences, and the prior
//! turn's digest. One lock per session; readers take a snapshot copy so no
//! lock is ever held across a suspension point.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounded history of tool-bearing actions, newest first.
const MAX_RECENT_ACTIONS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentAction {
    pub query: String,
    pub tools: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveSessionContext {
    pub session_id: String,
    pub turn_count: u32,
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    /// domain → discovered facts.
    #[serde(default)]
    pub discovered_facts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub entities: Vec<String>,
    /// Newest first, bounded.
    #[serde(default)]
    pub recent_actions: VecDeque<RecentAction>,
    /// The previous turn's summarizer output, verbatim.
    #[serde(default)]
    pub last_turn_summary: Option<Value>,
    /// The previous turn's distilled capsule; working memory for delta
    /// computation.
    #[serde(default)]
    pub last_capsule: Option<Value>,
}

impl LiveSessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn record_action(&mut self, query: &str, tools: Vec<String>) {
        self.recent_actions.push_front(RecentAction {
            query: query.to_owned(),
            tools,
            at: Utc::now(),
        });
        while self.recent_actions.len() > MAX_RECENT_ACTIONS {
            self.recent_actions.pop_back();
        }
    }

    /// The most recent action that invoked tools, if any — used by the
    /// cache gate to reconstruct retry context.
    pub fn last_tool_action(&self) -> Option<&RecentAction> {
        self.recent_actions.iter().find(|a| !a.tools.is_empty())
    }
}

/// One owner per session. Mutation happens under the session's lock via
/// `update`; `snapshot` copies the state out so callers never hold the lock
/// across await points.
#[derive(Default)]
pub struct SessionMap {
    sessions: Mutex<HashMap<String, Arc<Mutex<LiveSessionContext>>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &str) -> Arc<Mutex<LiveSessionContext>> {
        self.sessions
            .lock()
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(LiveSessionContext::new(session_id))))
            .clone()
    }

    pub fn snapshot(&self, session_id: &str) -> LiveSessionContext {
        self.entry(session_id).lock().clone()
    }

    pub fn update<F, R>(&self, session_id: &str, mutate: F) -> R
    where
        F: FnOnce(&mut LiveSessionContext) -> R,
    {
        let entry = self.entry(session_id);
        let mut guard = entry.lock();
        mutate(&mut guard)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_actions_are_bounded_and_newest_first() {
        let mut ctx = LiveSessionContext::new("s1");
        for i in 0..15 {
            ctx.record_action(&format!("query {i}"), vec!["web.search".into()]);
        }
        assert_eq!(ctx.recent_actions.len(), MAX_RECENT_ACTIONS);
        assert_eq!(ctx.recent_actions[0].query, "query 14");
    }

    #[test]
    fn snapshot_is_a_copy() {
        let map = SessionMap::new();
        map.update("s1", |ctx| {
            ctx.preferences.insert("budget".into(), "under 100 EUR".into());
        });

        let mut snap = map.snapshot("s1");
        snap.preferences.insert("color".into(), "blue".into());

        // The stored context is unaffected by mutating the snapshot.
        assert_eq!(map.snapshot("s1").preferences.len(), 1);
    }

    #[test]
    fn last_tool_action_skips_toolless_turns() {
        let mut ctx = LiveSessionContext::new("s1");
        ctx.record_action("searched cages", vec!["web.search".into()]);
        ctx.record_action("chit chat", vec![]);
        assert_eq!(ctx.last_tool_action().unwrap().query, "searched cages");
    }
}
