//! Navigation features built on top of [`CodeSearchClient`]
//!
//! Remote results supplement whatever the host already knows from files it
//! has loaded: results from files the host reports itself are dropped, so a
//! locally edited file is never shadowed by the index's older copy.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::client::CodeSearchClient;
use crate::match_filter::{byte_index, is_line_comment, utf16_len};
use crate::models::{LocatedSymbol, QueryType, MAX_CODE_SEARCH_RESULTS, QUERY_CODE_SEARCH_TIMEOUT};

/// Identifier under `column` (in UTF-16 units) in `line`
///
/// Scans back over letters and forward over letters and digits. Returns
/// `None` on a `//` comment line or when no identifier touches the column.
pub fn symbol_at(line: &str, column: usize) -> Option<&str> {
    if is_line_comment(line) {
        return None;
    }

    let column = byte_index(line, column.min(utf16_len(line)))?;

    let start = line[..column]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphabetic())
        .last()
        .map_or(column, |(i, _)| i);
    let end = line[column..]
        .char_indices()
        .find(|(_, c)| !c.is_alphanumeric())
        .map_or(line.len(), |(i, _)| column + i);

    let symbol = &line[start..end];
    (!symbol.is_empty()).then_some(symbol)
}

/// Read `path` from disk and find the identifier at `line`/`column`
///
/// A line past the end of the file yields `Ok(None)`: the editor may hold
/// unsaved changes.
pub fn symbol_in_file(path: &Path, line: usize, column: usize) -> Result<Option<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(content
        .lines()
        .nth(line)
        .and_then(|text| symbol_at(text, column))
        .map(str::to_string))
}

fn path_key(path: &str) -> String {
    if cfg!(windows) {
        path.to_lowercase()
    } else {
        path.to_string()
    }
}

/// Remote results not already covered by the host's own results
///
/// Drops every remote result whose file appears in `workspace`, removes
/// duplicates and orders by file, line and column.
pub fn merge_supplementary(workspace: &[LocatedSymbol], remote: &[LocatedSymbol]) -> Vec<LocatedSymbol> {
    let loaded: HashSet<String> = workspace.iter().map(|s| path_key(&s.file_path)).collect();

    let mut merged: Vec<LocatedSymbol> = remote
        .iter()
        .filter(|s| !loaded.contains(&path_key(&s.file_path)))
        .cloned()
        .collect();

    merged.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.start_line.cmp(&b.start_line))
            .then(a.start_column.cmp(&b.start_column))
            .then_with(|| a.cmp(b))
    });
    merged.dedup();
    merged
}

/// Go-to-definition, find-references and symbol search for a host
pub struct Navigator {
    client: Arc<CodeSearchClient>,
    timeout: Duration,
}

impl Navigator {
    pub fn new(client: Arc<CodeSearchClient>) -> Self {
        Self::with_timeout(client, QUERY_CODE_SEARCH_TIMEOUT)
    }

    pub fn with_timeout(client: Arc<CodeSearchClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Definition of the identifier at a position in a file on disk
    pub async fn find_definition(&self, file: &Path, line: usize, column: usize) -> Result<Option<LocatedSymbol>> {
        let Some(symbol) = symbol_in_file(file, line, column)? else {
            log::debug!("No symbol at {}:{}:{}", file.display(), line, column);
            return Ok(None);
        };

        let results = self
            .client
            .query(&symbol, 1, self.timeout, true, QueryType::FindDefinitions)
            .await;
        Ok(results.first().cloned())
    }

    /// References to `symbol` outside the files in `workspace`
    pub async fn find_references(&self, symbol: &str, workspace: &[LocatedSymbol]) -> Vec<LocatedSymbol> {
        let symbol = symbol.trim();
        if !symbol.chars().next().is_some_and(char::is_alphabetic) {
            log::debug!("Not searching references for '{}'", symbol);
            return Vec::new();
        }

        let remote = self
            .client
            .query(symbol, MAX_CODE_SEARCH_RESULTS, self.timeout, true, QueryType::FindReferences)
            .await;
        let merged = merge_supplementary(workspace, &remote);
        log::debug!("References to '{}': {} remote-only result(s)", symbol, merged.len());
        merged
    }

    /// Definitions whose name starts with `filter`, outside the files in `workspace`
    ///
    /// Filters shorter than `min_filter_length` (or empty) return nothing.
    pub async fn find_symbols(
        &self,
        filter: &str,
        max_items: usize,
        min_filter_length: usize,
        workspace: &[LocatedSymbol],
    ) -> Vec<LocatedSymbol> {
        let length = filter.chars().count();
        if length == 0 || length < min_filter_length {
            return Vec::new();
        }

        let max_results = max_items.min(MAX_CODE_SEARCH_RESULTS);
        let remote = self
            .client
            .query(filter, max_results, self.timeout, false, QueryType::FindDefinitions)
            .await;
        merge_supplementary(workspace, &remote)
    }
}
