//! Trim strategies for input docs that exceed their token cap.

use cg_contracts::estimate_tokens;

use crate::recipe::TrimMethod;

const END_MARKER: &str = "\n\n[TRUNCATED]\n";
const START_MARKER: &str = "[TRUNCATED: earlier content dropped]\n\n";

/// Apply a trim strategy so the result fits in `max_tokens`. Returns the
/// (possibly unchanged) content and whether trimming happened.
///
/// Content exactly at the cap is untouched; one token over triggers the
/// strategy.
pub fn apply(method: TrimMethod, content: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(content) <= max_tokens {
        return (content.to_owned(), false);
    }
    let trimmed = match method {
        TrimMethod::TruncateEnd => truncate_end(content, max_tokens),
        TrimMethod::TruncateStart => truncate_start(content, max_tokens),
        TrimMethod::DropOldest => drop_oldest(content, max_tokens),
        TrimMethod::Summarize => summarize(content),
    };
    (trimmed, true)
}

fn char_floor(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Keep the prefix up to the limit; append a marker. The marker's own
/// chars are paid for inside the cap so the result never exceeds it.
fn truncate_end(content: &str, max_tokens: usize) -> String {
    let keep = char_floor(content, (max_tokens * 4).saturating_sub(END_MARKER.len()));
    format!("{}{END_MARKER}", &content[..keep])
}

/// Keep the suffix; prepend a marker.
fn truncate_start(content: &str, max_tokens: usize) -> String {
    let max_chars = (max_tokens * 4).saturating_sub(START_MARKER.len());
    let start = char_floor(content, content.len().saturating_sub(max_chars));
    // Round forward to a char boundary if the floor landed short.
    let mut i = start;
    while i < content.len() && !content.is_char_boundary(i) {
        i += 1;
    }
    format!("{START_MARKER}{}", &content[i..])
}

/// For JSONL-style logs: keep the newest lines that fit.
fn drop_oldest(content: &str, max_tokens: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in lines.iter().rev() {
        let cost = estimate_tokens(line) + 1;
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        kept.push(line);
    }
    kept.reverse();
    let dropped = lines.len() - kept.len();
    if dropped > 0 {
        format!("[{dropped} older entries dropped]\n{}", kept.join("\n"))
    } else {
        kept.join("\n")
    }
}

/// Replace with a one-line placeholder counting the content's items.
fn summarize(content: &str) -> String {
    let items = content.lines().filter(|l| !l.trim().is_empty()).count();
    let first = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .chars()
        .take(80)
        .collect::<String>();
    format!("[{items} items, starting with: {first}…]")
}
