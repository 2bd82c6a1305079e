//! Token-budget enforcement at component boundaries.
//!
//! Token counts are estimated at ~4 chars/token (conservative for English).
//! Over-limit text is truncated, preferring the last sentence boundary
//! within 80% of the cap, with a fixed marker appended.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Marker appended to truncated text. Exact string, relied on by tests and
/// downstream log scrapers.
const TRUNCATION_MARKER: &str = "\n\n... [truncated to fit token budget]";
const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a text (~4 chars/token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

#[derive(Default)]
pub struct TokenBudgetEnforcer {
    usage: RwLock<HashMap<String, usize>>,
}

impl TokenBudgetEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage and report whether the component stayed inside its
    /// allotment.
    pub fn check_budget(&self, component: &str, tokens_used: usize, allocated: usize) -> bool {
        self.usage.write().insert(component.to_owned(), tokens_used);
        if tokens_used > allocated {
            tracing::warn!(
                component,
                tokens_used,
                allocated,
                over = tokens_used - allocated,
                "component over token budget"
            );
            false
        } else {
            true
        }
    }

    /// Truncate `text` to `max_tokens`, preferring a sentence boundary in
    /// the last 20% of the window.
    pub fn enforce_limit(&self, component: &str, text: &str, max_tokens: usize) -> String {
        let max_chars = max_tokens * CHARS_PER_TOKEN;
        if text.len() <= max_chars {
            return text.to_owned();
        }

        tracing::info!(
            component,
            from_chars = text.len(),
            to_chars = max_chars,
            max_tokens,
            "truncating to fit token budget"
        );

        // Cut on a char boundary at or below the cap.
        let mut cut = max_chars;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &text[..cut];

        let last_period = window.rfind('.');
        let last_newline = window.rfind('\n');
        let boundary = last_period.max(last_newline);

        let truncated = match boundary {
            Some(pos) if pos + 1 >= max_chars * 8 / 10 => &text[..pos + 1],
            _ => window,
        };

        format!("{truncated}{TRUNCATION_MARKER}")
    }

    pub fn usage_report(&self) -> HashMap<String, usize> {
        self.usage.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_untouched() {
        let e = TokenBudgetEnforcer::new();
        let text = "short text.";
        assert_eq!(e.enforce_limit("planner", text, 100), text);
    }

    #[test]
    fn over_limit_gets_marker() {
        let e = TokenBudgetEnforcer::new();
        let text = "word ".repeat(200);
        let out = e.enforce_limit("planner", &text, 10);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() < text.len());
    }

    #[test]
    fn sentence_boundary_preferred_when_close() {
        let e = TokenBudgetEnforcer::new();
        // A period lands inside the last 20% of the 40-char window.
        let text = format!("{}. tail that will be dropped entirely", "a".repeat(35));
        let out = e.enforce_limit("planner", &text, 10);
        assert!(out.starts_with(&"a".repeat(35)));
        assert!(out.contains('.'));
        assert!(!out.contains("tail"));
    }

    #[test]
    fn budget_check_records_usage() {
        let e = TokenBudgetEnforcer::new();
        assert!(e.check_budget("verifier", 100, 200));
        assert!(!e.check_budget("planner", 300, 200));
        let report = e.usage_report();
        assert_eq!(report["verifier"], 100);
        assert_eq!(report["planner"], 300);
    }
}
