//! Ordered pattern lists: the first regex that matches wins.
//!
//! Press offices reword the same sentence every few weeks, so each metric is
//! described by a list of known phrasings, newest first. Patterns are
//! compiled once in `lazy_static!` blocks by their owners and passed here as
//! slices.

use regex::{Captures, Regex};

use super::numbers::parse_num;

/// Captures of the first pattern in `patterns` that matches `text`.
pub fn first_captures<'t>(patterns: &[Regex], text: &'t str) -> Option<Captures<'t>> {
    patterns.iter().find_map(|pattern| pattern.captures(text))
}

/// Text of group `group` from the first matching pattern that captured it.
pub fn first_group<'t>(patterns: &[Regex], text: &'t str, group: &str) -> Option<&'t str> {
    // ---
    patterns
        .iter()
        .filter_map(|pattern| pattern.captures(text))
        .find_map(|caps| caps.name(group))
        .map(|m| m.as_str())
}

/// Number in group `group` from the first matching pattern.
pub fn first_num(patterns: &[Regex], text: &str, group: &str) -> Option<i64> {
    first_group(patterns, text, group).and_then(parse_num)
}

/// Number in a named group of an already matched capture set.
pub fn capture_num(caps: &Captures<'_>, group: &str) -> Option<i64> {
    caps.name(group).and_then(|m| parse_num(m.as_str()))
}

/// Compile a list of literal patterns. Only used for compile-time constant
/// pattern tables inside `lazy_static!`.
pub fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid pattern {p:?}: {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_first_pattern_wins() {
        // ---
        let patterns = compile_all(&[
            r"total of (?P<n>[\d,]+) cases",
            r"(?P<n>[\d,]+) confirmed",
        ]);

        let text = "a total of 1,024 cases, 1,000 confirmed";
        assert_eq!(first_num(&patterns, text, "n"), Some(1024));
        assert_eq!(first_num(&patterns, "now 12 confirmed", "n"), Some(12));
        assert_eq!(first_num(&patterns, "nothing here", "n"), None);
    }

    #[test]
    fn test_optional_group_falls_through() {
        // ---
        let patterns = compile_all(&[r"cases(?: \((?P<deaths>\d+) deaths\))?", r"(?P<deaths>\d+) died"]);
        assert_eq!(first_group(&patterns, "cases; 3 died", "deaths"), Some("3"));
    }
}
