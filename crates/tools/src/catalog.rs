//! Shipped tool contracts and category mapping.

/// Tools the system ships contracts for. Anything else is still invoked
/// verbatim — tools are opaque RPCs — but unknown names are logged.
pub const KNOWN_TOOLS: &[&str] = &[
    "file.read",
    "file.write",
    "file.edit",
    "git.status",
    "git.diff",
    "git.commit",
    "bash.execute",
    "web.search",
    "web.visit",
    "research.orchestrate",
    "memory.save",
    "memory.query",
    "code.verify_suite",
];

pub fn known_tools() -> &'static [&'static str] {
    KNOWN_TOOLS
}

/// The breaker category for a tool name: the dotted prefix (`web.search`
/// → `web`), or the whole name when undotted.
pub fn tool_category(tool: &str) -> &str {
    tool.split('.').next().unwrap_or(tool)
}

/// Whether a tool is on the configured approval-required list. Entries may
/// be exact names or category wildcards (`git.*`).
pub fn is_approval_required(tool: &str, approval_list: &[String]) -> bool {
    approval_list.iter().any(|entry| {
        if let Some(prefix) = entry.strip_suffix(".*") {
            tool_category(tool) == prefix
        } else {
            entry == tool
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_extraction() {
        assert_eq!(tool_category("web.search"), "web");
        assert_eq!(tool_category("bash.execute"), "bash");
        assert_eq!(tool_category("undotted"), "undotted");
    }

    #[test]
    fn approval_matches_exact_and_wildcard() {
        let list = vec!["file.write".to_string(), "git.*".to_string()];
        assert!(is_approval_required("file.write", &list));
        assert!(is_approval_required("git.commit", &list));
        assert!(!is_approval_required("file.read", &list));
    }
}
