//! Laying ledger rows into file text.
//!
//! The gate's in-memory buffers and the apply writer both go through
//! [`splice_file`], so what was checked is byte-for-byte what gets written.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Range;

use dualstate_core::types::{ChangeLedgerRow, FutureAction, Span};

use crate::error::SpliceError;

/// Rows grouped by the file they touch, inert rows dropped.
pub fn group_by_file(rows: &[ChangeLedgerRow]) -> BTreeMap<String, Vec<&ChangeLedgerRow>> {
    let mut files: BTreeMap<String, Vec<&ChangeLedgerRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.future_action.is_inert()) {
        files.entry(row.key.file_path.clone()).or_default().push(row);
    }
    files
}

/// Apply every row for `file` to its current text (`None` when the file
/// does not exist yet) and return the proposed text.
///
/// Edit replaces the row's current code, Delete removes it together with
/// its trailing newline, Create appends the new code after a blank line.
/// The current code must occur once in the file, or once starting inside
/// the row's span; otherwise the row is reported rather than guessed.
/// Rows with spans are laid bottom-up so earlier lines keep their numbers.
pub fn splice_file(
    file: &str,
    original: Option<&str>,
    rows: &[&ChangeLedgerRow],
) -> Result<String, SpliceError> {
    let mut ordered: Vec<&ChangeLedgerRow> = rows.to_vec();
    ordered.sort_by_key(|r| {
        (
            r.future_action == FutureAction::Create,
            r.current_span.is_none(),
            Reverse(r.current_span.map_or(0, |s| s.start_line)),
        )
    });

    let mut text = original.unwrap_or_default().to_string();
    for row in ordered {
        match row.future_action {
            FutureAction::None => {}
            FutureAction::Edit => {
                let future = future_code(row)?;
                let at = locate(&text, file, row)?;
                let len = current_len(row);
                text.replace_range(at..at + len, future);
            }
            FutureAction::Delete => {
                let at = locate(&text, file, row)?;
                let mut end = at + current_len(row);
                if text[end..].starts_with('\n') {
                    end += 1;
                }
                text.replace_range(at..end, "");
            }
            FutureAction::Create => {
                let future = future_code(row)?;
                if !text.is_empty() {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push('\n');
                }
                text.push_str(future);
                if !future.ends_with('\n') {
                    text.push('\n');
                }
            }
        }
    }
    Ok(text)
}

fn future_code(row: &ChangeLedgerRow) -> Result<&str, SpliceError> {
    row.future_code
        .as_deref()
        .ok_or_else(|| SpliceError::MissingFutureCode {
            key: row.key.clone(),
        })
}

fn current_len(row: &ChangeLedgerRow) -> usize {
    row.current_code.as_deref().map_or(0, str::len)
}

fn locate(text: &str, file: &str, row: &ChangeLedgerRow) -> Result<usize, SpliceError> {
    let not_found = || SpliceError::SliceNotFound {
        key: row.key.clone(),
        file: file.to_string(),
    };
    let code = row
        .current_code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or_else(not_found)?;

    let found: Vec<usize> = text.match_indices(code).map(|(at, _)| at).collect();
    match found.as_slice() {
        [] => return Err(not_found()),
        [at] => return Ok(*at),
        _ => {}
    }
    if let Some(span) = row.current_span {
        let window = line_window(text, span);
        let inside: Vec<usize> = found.iter().copied().filter(|at| window.contains(at)).collect();
        if let [at] = inside.as_slice() {
            return Ok(*at);
        }
    }
    Err(SpliceError::SliceAmbiguous {
        key: row.key.clone(),
        file: file.to_string(),
        matches: found.len(),
    })
}

/// Byte range of `span`'s lines in `text`.
fn line_window(text: &str, span: Span) -> Range<usize> {
    let mut starts = std::iter::once(0).chain(text.match_indices('\n').map(|(at, _)| at + 1));
    let start = starts
        .nth(span.start_line.saturating_sub(1) as usize)
        .unwrap_or(text.len());
    let lines = span.end_line.saturating_sub(span.start_line) as usize + 1;
    let end = starts.nth(lines - 1).unwrap_or(text.len());
    start..end
}
