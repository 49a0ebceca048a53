//! Offset reconciliation: remote character offsets -> local line/column
//!
//! The remote index reports each hit as an offset from the start of its own
//! stored copy of a file. Whether that copy used `\n` or `\r\n` line endings
//! is unknown to us, and may differ from the local checkout. Rather than
//! guess once per file, the reconciler keeps a running line offset for every
//! line-ending hypothesis and, line by line, tries each hypothesis in priority
//! order. The first hypothesis whose candidate passes the [`MatchFilter`]
//! resolves (and retires) the hit.
//!
//! A single pass over the file is enough, and the pass stops as soon as every
//! hit has been resolved. Offsets and columns are counted in UTF-16 code
//! units, so non-ASCII text earlier in a file does not shift later hits.

use crate::match_filter::{utf16_len, MatchFilter};
use crate::models::{LocatedSymbol, RawHit};

/// A line-terminator convention the remote index may have used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
    /// `\r` (classic Mac OS)
    Cr,
}

impl LineEnding {
    /// Number of characters the terminator adds to the running offset
    pub fn width(&self) -> usize {
        match self {
            LineEnding::Lf | LineEnding::Cr => 1,
            LineEnding::CrLf => 2,
        }
    }
}

/// Hypotheses tried by default, in priority order
pub const DEFAULT_LINE_ENDINGS: &[LineEnding] = &[LineEnding::Lf, LineEnding::CrLf];

/// Output of reconciling one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub symbols: Vec<LocatedSymbol>,
    /// Number of lines visited before the scan finished or exited early
    pub lines_scanned: usize,
}

/// Resolves raw hits against the lines of one local file
#[derive(Debug, Clone)]
pub struct OffsetReconciler {
    line_endings: Vec<LineEnding>,
}

impl Default for OffsetReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_ENDINGS.to_vec())
    }
}

impl OffsetReconciler {
    /// Create a reconciler trying `line_endings` in the given order
    pub fn new(line_endings: Vec<LineEnding>) -> Self {
        Self { line_endings }
    }

    pub fn line_endings(&self) -> &[LineEnding] {
        &self.line_endings
    }

    /// Reconcile `hits` against `content` (full text of the local file)
    pub fn reconcile_text(
        &self,
        file_path: &str,
        content: &str,
        hits: &[RawHit],
        filter: &MatchFilter<'_>,
    ) -> Reconciliation {
        self.reconcile(file_path, content.lines(), hits, filter)
    }

    /// Reconcile `hits` against `lines` (terminators already stripped)
    ///
    /// At most one symbol is produced per hit. `file_path` is copied into
    /// every produced symbol.
    pub fn reconcile<'l, I>(
        &self,
        file_path: &str,
        lines: I,
        hits: &[RawHit],
        filter: &MatchFilter<'_>,
    ) -> Reconciliation
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut result = Reconciliation::default();

        let mut pending: Vec<&RawHit> = hits.iter().collect();
        pending.sort_by_key(|hit| hit.char_offset);

        let mut line_offsets = vec![0usize; self.line_endings.len()];

        for (line_number, line) in lines.into_iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            result.lines_scanned += 1;
            let line_len = utf16_len(line);

            pending.retain(|hit| {
                match resolve_on_line(file_path, line_number, line, line_len, &line_offsets, hit, filter) {
                    Some(symbol) => {
                        result.symbols.push(symbol);
                        false
                    }
                    None => true,
                }
            });

            for (offset, ending) in line_offsets.iter_mut().zip(&self.line_endings) {
                *offset += line_len + ending.width();
            }
        }

        result
    }
}

/// Try every hypothesis window on this line; first accepted wins
fn resolve_on_line(
    file_path: &str,
    line_number: usize,
    line: &str,
    line_len: usize,
    line_offsets: &[usize],
    hit: &RawHit,
    filter: &MatchFilter<'_>,
) -> Option<LocatedSymbol> {
    line_offsets.iter().find_map(|&line_offset| {
        if hit.char_offset < line_offset || hit.char_offset >= line_offset + line_len {
            return None;
        }

        let column = hit.char_offset - line_offset;
        let accepted = filter.accept(line, column, hit.length)?;
        Some(LocatedSymbol::new(
            file_path,
            line_number,
            column,
            accepted.end_column,
            accepted.display_text,
        ))
    })
}
