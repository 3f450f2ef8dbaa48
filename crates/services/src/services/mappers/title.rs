//! Title normalization and the cross-system match predicate.

use once_cell::sync::Lazy;
use regex::Regex;

/// Both normalized titles must exceed this length for substring matching.
/// The floor keeps short titles like "Fix bug" from adopting longer ones.
pub const TITLE_MATCH_MIN_LEN: usize = 10;

static BRACKET_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\[(?:P[0-4]|PERF[^\]]*|TIER [0-9]+|BUG|FIXED|ACTION|EPIC|WIP)\]\s*")
        .expect("valid regex")
});

/// Lowercase, trim, and strip leading classification brackets
/// (`[P0]..[P4]`, `[PERF*]`, `[TIER n]`, `[BUG]`, `[FIXED]`, `[ACTION]`,
/// `[EPIC]`, `[WIP]`), repeatedly so stacked prefixes all fall away.
pub fn normalize_title(title: &str) -> String {
    let mut current = title.trim();
    loop {
        match BRACKET_PREFIX_RE.find(current) {
            Some(m) if m.start() == 0 => current = current[m.end()..].trim_start(),
            _ => break,
        }
    }
    current.trim().to_lowercase()
}

/// Titles match on normalized equality, or — when both normalized forms
/// exceed [`TITLE_MATCH_MIN_LEN`] — on strict containment.
pub fn titles_match(a: &str, b: &str) -> bool {
    let na = normalize_title(a);
    let nb = normalize_title(b);

    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }

    na.chars().count() > TITLE_MATCH_MIN_LEN
        && nb.chars().count() > TITLE_MATCH_MIN_LEN
        && (na.contains(&nb) || nb.contains(&na))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_brackets() {
        assert_eq!(normalize_title("[P0] Fix the auth bug"), "fix the auth bug");
        assert_eq!(normalize_title("[BUG] [WIP] Fix the auth bug"), "fix the auth bug");
        assert_eq!(normalize_title("[PERF-HOT] Tighten loop"), "tighten loop");
        assert_eq!(normalize_title("[TIER 2] Shard the index"), "shard the index");
        assert_eq!(normalize_title("  Plain Title  "), "plain title");
    }

    #[test]
    fn test_non_prefix_brackets_survive() {
        // Only the known classification brackets are stripped.
        assert_eq!(normalize_title("[API] Add endpoint"), "[api] add endpoint");
    }

    #[test]
    fn test_exact_match_any_length() {
        assert!(titles_match("Fix bug", "fix bug"));
        assert!(titles_match("[P1] Fix bug", "Fix bug"));
    }

    #[test]
    fn test_short_title_containment_rejected() {
        // "fix bug" is 7 chars; containment must not fire.
        assert!(!titles_match("Fix bug", "Fix bug in authentication"));
    }

    #[test]
    fn test_long_title_containment_accepted() {
        assert!(titles_match(
            "Fix bug in authentication",
            "Fix bug in authentication flow for SSO"
        ));
    }

    #[test]
    fn test_empty_titles_never_match() {
        assert!(!titles_match("", ""));
        assert!(!titles_match("[WIP]", "something"));
    }
}
