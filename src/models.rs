//! Core data models for fastnav
//!
//! These structures flow through the whole pipeline: a navigation request
//! becomes a [`QueryRequest`], the remote index answers with [`RawHit`]s, and
//! the reconciler turns those into [`LocatedSymbol`]s the host can display.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

/// Upper bound on results requested from the remote index
pub const MAX_CODE_SEARCH_RESULTS: usize = 200;

/// Default bound on one remote round trip
pub const QUERY_CODE_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of navigation a query serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    FindDefinitions,
    FindReferences,
}

impl QueryType {
    /// Prefix prepended to the filter in the remote search text.
    ///
    /// References carry no prefix: the index's `ref:` qualifier misses too
    /// many usages to be useful.
    pub fn search_prefix(&self) -> &'static str {
        match self {
            QueryType::FindDefinitions => "def:",
            QueryType::FindReferences => "",
        }
    }

    pub fn is_references(&self) -> bool {
        matches!(self, QueryType::FindReferences)
    }
}

/// One navigation query, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Text to search for (identifier or identifier prefix)
    pub filter_text: String,
    /// Maximum number of files the remote index should return
    pub max_results: usize,
    /// Bound on the remote round trip
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Case-sensitive full-token match (vs case-insensitive prefix)
    pub exact_match: bool,
    pub query_type: QueryType,
}

impl QueryRequest {
    pub fn new(
        filter_text: impl Into<String>,
        max_results: usize,
        timeout: Duration,
        exact_match: bool,
        query_type: QueryType,
    ) -> Self {
        Self {
            filter_text: filter_text.into(),
            max_results: max_results.min(MAX_CODE_SEARCH_RESULTS),
            timeout,
            exact_match,
            query_type,
        }
    }

    /// Normalized key under which results of this query are cached
    ///
    /// `def:Foo` for an exact definition lookup, `Foo*` for a reference prefix
    /// search, and so on.
    pub fn cache_key(&self) -> String {
        format!(
            "{}{}{}",
            self.query_type.search_prefix(),
            self.filter_text,
            if self.exact_match { "" } else { "*" }
        )
    }
}

/// A single match reported by the remote index
///
/// `char_offset` is relative to the start of the index's stored copy of the
/// file, whose line endings may differ from the local checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHit {
    /// Repository-relative, `/`-separated path
    pub file_path: String,
    pub char_offset: usize,
    pub length: usize,
}

impl RawHit {
    pub fn new(file_path: impl Into<String>, char_offset: usize, length: usize) -> Self {
        Self {
            file_path: file_path.into(),
            char_offset,
            length,
        }
    }
}

/// A match resolved to a concrete local location
///
/// Lines and columns are 0-indexed; columns are byte offsets within the line.
/// Matches never span lines, so `start_line == end_line`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocatedSymbol {
    /// Absolute local path of the file
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
    /// Matched identifier (definitions) or the trimmed source line (references)
    pub text: String,
}

impl LocatedSymbol {
    pub fn new(file_path: impl Into<String>, line: usize, start_column: usize, end_column: usize, text: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            start_line: line,
            end_line: line,
            start_column,
            end_column,
            text: text.into(),
        }
    }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_shapes() {
        let exact_def = QueryRequest::new("Widget", 1, QUERY_CODE_SEARCH_TIMEOUT, true, QueryType::FindDefinitions);
        assert_eq!(exact_def.cache_key(), "def:Widget");

        let prefix_refs = QueryRequest::new("Widget", 10, QUERY_CODE_SEARCH_TIMEOUT, false, QueryType::FindReferences);
        assert_eq!(prefix_refs.cache_key(), "Widget*");
    }

    #[test]
    fn test_max_results_capped() {
        let request = QueryRequest::new("x", 5000, QUERY_CODE_SEARCH_TIMEOUT, true, QueryType::FindReferences);
        assert_eq!(request.max_results, MAX_CODE_SEARCH_RESULTS);
    }

    #[test]
    fn test_query_type_parsing() {
        assert_eq!("find-definitions".parse::<QueryType>().unwrap(), QueryType::FindDefinitions);
        assert_eq!("Find-References".parse::<QueryType>().unwrap(), QueryType::FindReferences);
        assert!("find-everything".parse::<QueryType>().is_err());
    }

    #[test]
    fn test_query_request_wire_format() {
        let request = QueryRequest::new("Foo", 20, Duration::from_millis(1500), false, QueryType::FindDefinitions);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["timeout"], 1500);
        assert_eq!(json["query_type"], "find-definitions");

        let decoded: QueryRequest = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, request);
    }
}
