use serde::{Deserialize, Serialize};

/// Coarse intent of a user query, assigned deterministically before the
/// cache gate runs. Drives cache-domain filtering and fast-bypass rules.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Buy,
    Find,
    Recall,
    Retry,
    Inform,
    #[default]
    Chat,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Buy => "buy",
            QueryIntent::Find => "find",
            QueryIntent::Recall => "recall",
            QueryIntent::Retry => "retry",
            QueryIntent::Inform => "inform",
            QueryIntent::Chat => "chat",
        }
    }

    /// Cache domains an intent is allowed to match. Domain isolation is
    /// absolute: lookups never cross this set.
    pub fn cache_domains(&self) -> &'static [&'static str] {
        match self {
            QueryIntent::Buy => &["pricing", "commerce"],
            QueryIntent::Find => &["research", "specifications"],
            QueryIntent::Inform => &["research", "general"],
            QueryIntent::Recall | QueryIntent::Retry | QueryIntent::Chat => &["general"],
        }
    }
}

/// Result of deterministic intent classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentClassification {
    pub intent: QueryIntent,
    pub confidence: f64,
    /// Action verbs found in the query, if any.
    pub action_verbs: Vec<String>,
    /// True when the query carries several distinct imperative goals.
    pub multi_goal: bool,
}

const RECALL_PATTERNS: &[&str] = &[
    "why did you",
    "why those",
    "why that",
    "explain your choice",
    "tell me more about",
    "more about the",
    "the first one",
    "the second one",
    "the cheapest one",
    "those options",
    "that option",
    "your recommendation",
    "why did you choose",
    "why did you pick",
    "how did you decide",
    "what was the",
    "which one",
    "you mentioned",
    "you said",
    "you recommended",
    "what were we",
    "just talking about",
];

const RETRY_KEYWORDS: &[&str] = &[
    "retry",
    "try again",
    "refresh",
    "redo",
    "rerun",
    "re-run",
    "once more",
    "search again",
    "new search",
    "fresh search",
    "re-search",
];

const BUY_VERBS: &[&str] = &["buy", "purchase", "order", "price", "cost", "cheapest", "deal"];
const FIND_VERBS: &[&str] = &["find", "search", "look for", "locate", "get", "show me", "fetch", "list"];
const INFORM_MARKERS: &[&str] = &["what is", "what are", "how do", "how does", "explain", "tell me about", "why is"];

const ACTION_VERBS: &[&str] = &[
    "find", "get", "search", "buy", "show", "list", "tell", "explain", "fetch", "compare",
];

const MULTI_GOAL_INDICATORS: &[&str] = &["and also", "additionally", "as well as", "; ", "plus "];

/// Patterns that identify recall / back-reference queries. Exposed so the
/// cache gate can reuse the exact same list for its fast bypass.
pub fn is_recall_query(query: &str) -> bool {
    let q = query.to_lowercase();
    RECALL_PATTERNS.iter().any(|p| q.contains(p))
}

/// Explicit retry / refresh signals. The cache gate is the single
/// authoritative consumer; the planner receives the resulting flag.
pub fn is_retry_query(query: &str) -> bool {
    let q = query.to_lowercase();
    RETRY_KEYWORDS.iter().any(|p| q.contains(p))
}

/// Multi-goal detection: several action verbs, or an explicit conjunction
/// marker. Multi-goal queries are split into subtasks and never served from
/// cache.
pub fn is_multi_goal(query: &str) -> bool {
    let q = query.to_lowercase();
    let verb_count = ACTION_VERBS.iter().filter(|v| q.contains(*v)).count();
    verb_count > 1 || MULTI_GOAL_INDICATORS.iter().any(|m| q.contains(m))
}

/// Classify a query without an LLM. Confidence reflects how many signals
/// agreed; queries with no signal at all land in `Chat` at low confidence.
pub fn classify(query: &str) -> IntentClassification {
    let q = query.to_lowercase();
    let action_verbs: Vec<String> = ACTION_VERBS
        .iter()
        .filter(|v| q.contains(*v))
        .map(|v| (*v).to_owned())
        .collect();
    let multi_goal = is_multi_goal(query);

    let (intent, confidence) = if is_retry_query(query) {
        (QueryIntent::Retry, 0.95)
    } else if is_recall_query(query) {
        (QueryIntent::Recall, 0.9)
    } else if BUY_VERBS.iter().any(|v| q.contains(v)) {
        (QueryIntent::Buy, 0.8)
    } else if FIND_VERBS.iter().any(|v| q.contains(v)) {
        (QueryIntent::Find, 0.75)
    } else if INFORM_MARKERS.iter().any(|v| q.contains(v)) {
        (QueryIntent::Inform, 0.7)
    } else {
        (QueryIntent::Chat, 0.25)
    };

    IntentClassification {
        intent,
        confidence,
        action_verbs,
        multi_goal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_beats_find() {
        let c = classify("retry that search please");
        assert_eq!(c.intent, QueryIntent::Retry);
        assert!(c.confidence > 0.9);
    }

    #[test]
    fn recall_detected() {
        assert!(is_recall_query("what were we just talking about?"));
        let c = classify("why did you pick the second one");
        assert_eq!(c.intent, QueryIntent::Recall);
    }

    #[test]
    fn multi_goal_on_two_verbs() {
        assert!(is_multi_goal("find hamster cages and compare prices"));
        assert!(!is_multi_goal("find hamster cages"));
    }

    #[test]
    fn unknown_query_is_low_confidence_chat() {
        let c = classify("hmm ok");
        assert_eq!(c.intent, QueryIntent::Chat);
        assert!(c.confidence < 0.3);
    }

    #[test]
    fn domain_isolation_sets_are_disjoint_for_buy_and_find() {
        let buy = QueryIntent::Buy.cache_domains();
        let find = QueryIntent::Find.cache_domains();
        assert!(buy.iter().all(|d| !find.contains(d)));
    }
}
