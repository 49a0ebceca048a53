//! Parallel reconciliation of remote hits against the local checkout
//!
//! Each file referenced by a batch of hits is read once and handed to the
//! [`OffsetReconciler`]. Files are processed on a dedicated rayon pool that
//! leaves one core free for the host process.
//!
//! The local checkout and the remote index are not kept in lockstep, so a
//! file that exists remotely but not locally is skipped rather than treated
//! as an error. Genuine I/O failures fail the whole batch, but only after
//! every in-flight scan has finished.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::match_filter::MatchFilter;
use crate::models::{LocatedSymbol, QueryRequest, RawHit};
use crate::reconciler::OffsetReconciler;

/// Hits grouped by repository-relative file path
pub type HitsByFile = HashMap<String, Vec<RawHit>>;

/// Group a flat list of hits by the file they point into
pub fn group_by_file(hits: impl IntoIterator<Item = RawHit>) -> HitsByFile {
    let mut grouped = HitsByFile::new();
    for hit in hits {
        grouped.entry(hit.file_path.clone()).or_default().push(hit);
    }
    grouped
}

/// Number of scan threads: all cores but one, never fewer than one
pub fn default_parallelism() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Maps batches of remote hits onto local files
pub struct FanOutEngine {
    root: PathBuf,
    pool: rayon::ThreadPool,
    reconciler: OffsetReconciler,
}

impl FanOutEngine {
    /// Create an engine for the repository at `root` using [`default_parallelism`]
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_parallelism(root, default_parallelism())
    }

    /// Create an engine with an explicit number of scan threads
    pub fn with_parallelism(root: impl Into<PathBuf>, num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("fastnav-scan-{}", i))
            .build()
            .context("Failed to create scan thread pool")?;

        log::debug!("Fan-out engine using {} scan threads", num_threads);

        Ok(Self {
            root: root.into(),
            pool,
            reconciler: OffsetReconciler::default(),
        })
    }

    /// Replace the reconciler (e.g. to try additional line-ending conventions)
    pub fn with_reconciler(mut self, reconciler: OffsetReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Map a remote `/`-separated path to a local path under the root
    ///
    /// Returns `None` for paths that would escape the repository root.
    pub fn resolve_path(&self, remote_path: &str) -> Option<PathBuf> {
        let relative: PathBuf = remote_path
            .trim_start_matches('/')
            .split('/')
            .filter(|part| !part.is_empty())
            .collect();

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return None;
        }

        Some(self.root.join(relative))
    }

    /// Reconcile every file in `hits_by_file` and return all located symbols
    ///
    /// Output order across files is unspecified. Setting `cancel` makes
    /// scans that have not started yet bail out, failing the batch.
    pub fn locate(
        &self,
        hits_by_file: &HitsByFile,
        request: &QueryRequest,
        cancel: &AtomicBool,
    ) -> Result<Vec<LocatedSymbol>> {
        let filter = MatchFilter::new(&request.filter_text, request.exact_match, request.query_type);
        let files: Vec<(&String, &Vec<RawHit>)> = hits_by_file.iter().collect();

        let outcomes: Vec<Result<Option<Vec<LocatedSymbol>>>> = self.pool.install(|| {
            files
                .par_iter()
                .map(|(remote_path, hits)| {
                    if cancel.load(Ordering::Relaxed) {
                        anyhow::bail!("Scan cancelled before reading {}", remote_path);
                    }
                    self.scan_file(remote_path, hits, &filter)
                })
                .collect()
        });

        let mut located = Vec::new();
        let mut scanned = 0usize;
        for outcome in outcomes {
            if let Some(symbols) = outcome? {
                scanned += 1;
                located.extend(symbols);
            }
        }

        log::debug!(
            "Reconciled {} of {} files into {} symbol(s) for '{}'",
            scanned,
            files.len(),
            located.len(),
            request.filter_text
        );

        Ok(located)
    }

    /// Scan one file; `Ok(None)` means it was skipped
    fn scan_file(
        &self,
        remote_path: &str,
        hits: &[RawHit],
        filter: &MatchFilter<'_>,
    ) -> Result<Option<Vec<LocatedSymbol>>> {
        let Some(path) = self.resolve_path(remote_path) else {
            log::debug!("Ignoring hit path outside repository: {}", remote_path);
            return Ok(None);
        };

        if !path.is_file() {
            log::debug!("File {} from search results doesn't exist locally", path.display());
            return Ok(None);
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("File {} disappeared before it could be read", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        // Each invalid byte becomes one U+FFFD, a single unit like the index's decoded character
        let content = String::from_utf8_lossy(&bytes);

        let file_path = path.to_string_lossy();
        let result = self.reconciler.reconcile_text(&file_path, &content, hits, filter);

        if result.symbols.len() < hits.len() {
            log::debug!(
                "{}: resolved {} of {} hit(s) after scanning {} line(s)",
                path.display(),
                result.symbols.len(),
                hits.len(),
                result.lines_scanned
            );
        }

        Ok(Some(result.symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryType, QUERY_CODE_SEARCH_TIMEOUT};
    use crate::reconciler::LineEnding;
    use tempfile::TempDir;

    fn request(filter: &str) -> QueryRequest {
        QueryRequest::new(filter, 200, QUERY_CODE_SEARCH_TIMEOUT, true, QueryType::FindReferences)
    }

    #[test]
    fn test_group_by_file() {
        let grouped = group_by_file(vec![
            RawHit::new("a.cs", 0, 1),
            RawHit::new("b.cs", 3, 1),
            RawHit::new("a.cs", 9, 1),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a.cs"].len(), 2);
    }

    #[test]
    fn test_resolve_path_normalizes_separators() {
        let engine = FanOutEngine::with_parallelism("/repo", 1).unwrap();
        let resolved = engine.resolve_path("/src/Core/Widget.cs").unwrap();
        assert_eq!(resolved, Path::new("/repo").join("src").join("Core").join("Widget.cs"));
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        let engine = FanOutEngine::with_parallelism("/repo", 1).unwrap();
        assert!(engine.resolve_path("/../etc/passwd").is_none());
        assert!(engine.resolve_path("/").is_none());
    }

    #[test]
    fn test_parallelism_at_least_one() {
        let engine = FanOutEngine::with_parallelism("/repo", 0).unwrap();
        assert_eq!(engine.parallelism(), 1);
        assert!(default_parallelism() >= 1);
    }

    #[test]
    fn test_locate_skips_missing_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("present.cs"), "Widget w;\n").unwrap();

        let hits = group_by_file(vec![
            RawHit::new("/present.cs", 0, 6),
            RawHit::new("/missing.cs", 0, 6),
        ]);

        let engine = FanOutEngine::with_parallelism(temp.path(), 2).unwrap();
        let located = engine.locate(&hits, &request("Widget"), &AtomicBool::new(false)).unwrap();

        assert_eq!(located.len(), 1);
        assert!(located[0].file_path.ends_with("present.cs"));
        assert_eq!(located[0].text, "Widget w;");
    }

    #[test]
    fn test_cancelled_batch_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.cs"), "Widget\n").unwrap();
        let hits = group_by_file(vec![RawHit::new("a.cs", 0, 6)]);

        let engine = FanOutEngine::with_parallelism(temp.path(), 1).unwrap();
        let result = engine.locate(&hits, &request("Widget"), &AtomicBool::new(true));
        assert!(result.is_err());
    }

    #[test]
    fn test_with_reconciler_limits_line_endings() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.cs"), "a\nWidget\n").unwrap();
        // Offset computed as if the first line ended in CRLF
        let hits = group_by_file(vec![RawHit::new("a.cs", 3, 6)]);

        let engine = FanOutEngine::with_parallelism(temp.path(), 1).unwrap();
        assert_eq!(engine.root(), temp.path());
        let located = engine.locate(&hits, &request("Widget"), &AtomicBool::new(false)).unwrap();
        assert_eq!(located.len(), 1);

        let lf_only = engine.with_reconciler(OffsetReconciler::new(vec![LineEnding::Lf]));
        let located = lf_only.locate(&hits, &request("Widget"), &AtomicBool::new(false)).unwrap();
        assert!(located.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_scanned_lossily() {
        let temp = TempDir::new().unwrap();
        // Windows-1252 "é": one character in the index, one replacement char locally
        std::fs::write(temp.path().join("a.cs"), b"\xe9\nWidget x;\n").unwrap();
        let hits = group_by_file(vec![RawHit::new("a.cs", 2, 6)]);

        let engine = FanOutEngine::with_parallelism(temp.path(), 1).unwrap();
        let located = engine.locate(&hits, &request("Widget"), &AtomicBool::new(false)).unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].start_line, 1);
        assert_eq!(located[0].start_column, 0);
    }
}
