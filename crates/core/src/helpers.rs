//! Helper functions for text cleanup and display formatting.

use regex::Regex;
use std::sync::LazyLock;

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());
static TRAILING_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());

/// Clean text by normalizing line endings and trimming trailing whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ")
        .trim_end()
        .to_string()
}

/// Collapse runs of blank lines left behind by removed page elements.
pub fn collapse_blank_lines(text: &str) -> String {
    let trimmed = TRAILING_SPACE_RE.replace_all(text, "\n");
    BLANK_RUN_RE.replace_all(&trimmed, "\n\n").to_string()
}

/// Message text as shown in a transcript: cleaned, collapsed and trimmed.
pub fn normalize_message_text(raw: &str) -> String {
    collapse_blank_lines(&clean_text(raw)).trim().to_string()
}

/// Usage as a whole percentage of the context window. A zero window reads 0.
pub fn usage_percent(tokens: usize, context_window: usize) -> f64 {
    if context_window == 0 {
        return 0.0;
    }
    tokens as f64 / context_window as f64 * 100.0
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("hello\r\nworld\r"), "hello\nworld");
        assert_eq!(clean_text("test  \n  "), "test");
        assert_eq!(clean_text("a\u{a0}b"), "a b");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a  \n \n\t\n b"), "a\n\n b");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_normalize_message_text() {
        assert_eq!(normalize_message_text("\n  Hello\r\n\r\n\r\nthere  \n"), "Hello\n\nthere");
        assert_eq!(normalize_message_text(" \n\t "), "");
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(usage_percent(0, 128_000), 0.0);
        assert_eq!(usage_percent(64_000, 128_000), 50.0);
        assert_eq!(usage_percent(10, 0), 0.0);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
