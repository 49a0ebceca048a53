//! Acceptance rules for candidate matches
//!
//! The remote index is syntax-unaware and case-insensitive, so a raw hit is
//! only a hint. Before a hit becomes a [`LocatedSymbol`](crate::models::LocatedSymbol)
//! the candidate text at its position must pass the rules below:
//!
//! - lines that are `//` comments never match
//! - exact queries require byte-for-byte equality with the filter
//! - prefix queries require a case-insensitive "starts with"
//!
//! Columns and lengths count UTF-16 code units, the unit the index reports
//! offsets in and the default position encoding of language servers.

use crate::models::QueryType;

/// Marker for single-line comments
const LINE_COMMENT: &str = "//";

/// Result of accepting a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMatch {
    /// Exclusive end column of the matched text (after clamping), in UTF-16 units
    pub end_column: usize,
    /// Text shown to the user for this match
    pub display_text: String,
}

/// Decides whether a candidate range on a line is a real match
#[derive(Debug, Clone, Copy)]
pub struct MatchFilter<'a> {
    filter: &'a str,
    exact_match: bool,
    query_type: QueryType,
}

impl<'a> MatchFilter<'a> {
    pub fn new(filter: &'a str, exact_match: bool, query_type: QueryType) -> Self {
        Self {
            filter,
            exact_match,
            query_type,
        }
    }

    /// Check the candidate `[column, column + length)` on `line`
    ///
    /// The range is clamped to the line end: a hit that overruns the line
    /// means the local file and the indexed copy have diverged, and the
    /// clamped text usually fails the comparison below.
    pub fn accept(&self, line: &str, column: usize, length: usize) -> Option<AcceptedMatch> {
        if is_line_comment(line) {
            return None;
        }

        let end = column.checked_add(length)?.min(utf16_len(line));
        // A range splitting a surrogate pair cannot be a real match
        let start_byte = byte_index(line, column)?;
        let end_byte = byte_index(line, end)?;
        let candidate = line.get(start_byte..end_byte)?;

        let matched = if self.exact_match {
            candidate == self.filter
        } else {
            starts_with_ignore_case(candidate, self.filter)
        };

        if !matched {
            return None;
        }

        let display_text = if self.query_type.is_references() {
            line.trim().to_string()
        } else {
            candidate.to_string()
        };

        Some(AcceptedMatch {
            end_column: end,
            display_text,
        })
    }
}

/// True if the trimmed line starts with a `//` comment
pub fn is_line_comment(line: &str) -> bool {
    line.trim_start().starts_with(LINE_COMMENT)
}

/// Length of `text` in UTF-16 code units
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Byte index of the UTF-16 column `units` in `line`
///
/// `None` when the column lies inside a surrogate pair or past the line end.
pub fn byte_index(line: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (index, ch) in line.char_indices() {
        if seen == units {
            return Some(index);
        }
        if seen > units {
            return None;
        }
        seen += ch.len_utf16();
    }
    (seen == units).then_some(line.len())
}

/// Case-insensitive prefix test that also handles non-ASCII letters
pub fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    let mut hay = haystack.chars().flat_map(char::to_lowercase);
    prefix
        .chars()
        .flat_map(char::to_lowercase)
        .all(|p| hay.next() == Some(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_lines_rejected() {
        let filter = MatchFilter::new("foo", false, QueryType::FindDefinitions);
        assert!(filter.accept("// foo", 3, 3).is_none());
        assert!(filter.accept("    //foo", 6, 3).is_none());
        // Trailing comments are not whole-line comments
        assert!(filter.accept("foo(); // foo", 0, 3).is_some());
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        let filter = MatchFilter::new("Widget", true, QueryType::FindReferences);
        assert!(filter.accept("let w = Widget::new();", 8, 6).is_some());
        assert!(filter.accept("let w = widget::new();", 8, 6).is_none());
    }

    #[test]
    fn test_exact_match_rejects_longer_token() {
        let filter = MatchFilter::new("Widget", true, QueryType::FindReferences);
        assert!(filter.accept("WidgetFactory f;", 0, 13).is_none());
    }

    #[test]
    fn test_prefix_match_ignores_case() {
        let filter = MatchFilter::new("wid", false, QueryType::FindDefinitions);
        let accepted = filter.accept("class WidgetFactory", 6, 13).unwrap();
        assert_eq!(accepted.display_text, "WidgetFactory");
        assert_eq!(accepted.end_column, 19);

        assert!(filter.accept("class Gadget", 6, 6).is_none());
    }

    #[test]
    fn test_reference_display_text_is_trimmed_line() {
        let filter = MatchFilter::new("run", true, QueryType::FindReferences);
        let accepted = filter.accept("    runner.run();   ", 11, 3).unwrap();
        assert_eq!(accepted.display_text, "runner.run();");
    }

    #[test]
    fn test_range_clamped_to_line() {
        let filter = MatchFilter::new("foo", false, QueryType::FindDefinitions);
        let accepted = filter.accept("  foo", 2, 10).unwrap();
        assert_eq!(accepted.end_column, 5);
        assert_eq!(accepted.display_text, "foo");

        // Starting beyond the end of the line is never a match
        assert!(filter.accept("foo", 7, 3).is_none());
    }

    #[test]
    fn test_columns_count_utf16_units() {
        let filter = MatchFilter::new("Widget", true, QueryType::FindDefinitions);
        let accepted = filter.accept("é Widget", 2, 6).unwrap();
        assert_eq!(accepted.display_text, "Widget");
        assert_eq!(accepted.end_column, 8);

        // The emoji is two units wide
        let accepted = filter.accept("😀 Widget", 3, 6).unwrap();
        assert_eq!(accepted.end_column, 9);
    }

    #[test]
    fn test_split_surrogate_pair_rejected() {
        let filter = MatchFilter::new("😀", false, QueryType::FindDefinitions);
        assert!(filter.accept("a😀", 2, 1).is_none());
        assert!(filter.accept("a😀", 1, 2).is_some());
    }

    #[test]
    fn test_byte_index() {
        assert_eq!(byte_index("aé b", 2), Some(3));
        assert_eq!(byte_index("aé b", 4), Some(5));
        assert_eq!(byte_index("aé b", 5), None);
        assert_eq!(byte_index("😀x", 1), None);
        assert_eq!(byte_index("😀x", 2), Some(4));
        assert_eq!(utf16_len("😀x"), 3);
    }

    #[test]
    fn test_starts_with_ignore_case_unicode() {
        assert!(starts_with_ignore_case("ÉCOLE", "éco"));
        assert!(starts_with_ignore_case("anything", ""));
        assert!(!starts_with_ignore_case("ab", "abc"));
    }
}
