//! Rendering and parsing of the cross-system description footer.
//!
//! The footer is the only pointer embedded in free text; it is rendered and
//! parsed exclusively here, at the external boundary. Keys are
//! case-sensitive; trailing whitespace on the line is tolerated.

use once_cell::sync::Lazy;
use regex::Regex;

/// Separator introducing the footer block. Bit-exact in both directions.
pub const FOOTER_SEPARATOR: &str = "\n\n---\n";

static HULY_ISSUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Huly Issue:[ \t]*([A-Z][A-Z0-9]*-[0-9]+)[ \t\r]*$").expect("valid regex")
});

static PARENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Parent:[ \t]*([A-Z][A-Z0-9]*-[0-9]+)[ \t\r]*$").expect("valid regex")
});

/// Render the footer block for `identifier`, optionally carrying the parent
/// reference on the following line.
pub fn render_footer(identifier: &str, parent: Option<&str>) -> String {
    match parent {
        Some(parent) => format!("{FOOTER_SEPARATOR}Huly Issue: {identifier}\nParent: {parent}"),
        None => format!("{FOOTER_SEPARATOR}Huly Issue: {identifier}"),
    }
}

/// Append the footer to a (possibly empty) description.
pub fn append_footer(description: &str, identifier: &str, parent: Option<&str>) -> String {
    format!("{}{}", description, render_footer(identifier, parent))
}

/// Extract the `Huly Issue: <id>` reference, if present.
pub fn extract_huly_identifier(text: &str) -> Option<&str> {
    HULY_ISSUE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Extract the `Parent: <id>` reference, if present.
pub fn extract_parent_identifier(text: &str) -> Option<&str> {
    PARENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Remove the trailing footer block, returning the bare description used for
/// change comparison. Trailing whitespace ahead of the footer is dropped.
pub fn strip_footer(text: &str) -> &str {
    let body = match text.rfind("\n\n---\nHuly Issue:") {
        Some(idx) => &text[..idx],
        None => text,
    };
    body.trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_round_trip() {
        let description = "Add retry logic to the fetcher.";
        let rendered = append_footer(description, "ACME-17", None);
        assert!(rendered.ends_with("\n\n---\nHuly Issue: ACME-17"));
        assert_eq!(extract_huly_identifier(&rendered), Some("ACME-17"));
        assert_eq!(strip_footer(&rendered), description);
    }

    #[test]
    fn test_footer_with_parent() {
        let rendered = append_footer("body", "ACME-17", Some("ACME-3"));
        assert_eq!(extract_huly_identifier(&rendered), Some("ACME-17"));
        assert_eq!(extract_parent_identifier(&rendered), Some("ACME-3"));
        assert_eq!(strip_footer(&rendered), "body");
    }

    #[test]
    fn test_trailing_whitespace_tolerated() {
        let text = "body\n\n---\nHuly Issue: ACME-17   \nParent: ACME-3\t";
        assert_eq!(extract_huly_identifier(text), Some("ACME-17"));
        assert_eq!(extract_parent_identifier(text), Some("ACME-3"));
    }

    #[test]
    fn test_altered_capitalization_rejected() {
        assert_eq!(extract_huly_identifier("\n\n---\nhuly issue: ACME-17"), None);
        assert_eq!(extract_huly_identifier("\n\n---\nHULY ISSUE: ACME-17"), None);
        assert_eq!(extract_parent_identifier("parent: ACME-3"), None);
    }

    #[test]
    fn test_reference_must_start_its_line() {
        assert_eq!(
            extract_huly_identifier("see also Huly Issue: ACME-17 for context"),
            None
        );
    }

    #[test]
    fn test_strip_footer_without_footer() {
        assert_eq!(strip_footer("plain description"), "plain description");
        assert_eq!(strip_footer("trailing space  \n"), "trailing space");
    }

    #[test]
    fn test_empty_description() {
        let rendered = append_footer("", "ACME-1", None);
        assert_eq!(strip_footer(&rendered), "");
        assert_eq!(extract_huly_identifier(&rendered), Some("ACME-1"));
    }
}
