//! Header-row detection for exports that carry title or banner rows above
//! the column labels.

use crate::table::CellValue;

/// Default number of leading rows inspected.
pub const DEFAULT_SCAN_ROWS: usize = 10;

const MIN_FILLED_CELLS: usize = 3;
const MIN_ALPHA_CELLS: usize = 2;

/// Returns the 0-based index of the first row within `max_rows` that has at
/// least 3 non-empty cells, at least 2 of which contain a letter.
///
/// Falls back to row 0 when no scanned row qualifies.
pub fn detect_header_row(rows: &[Vec<CellValue>], max_rows: usize) -> usize {
    rows.iter()
        .take(max_rows)
        .position(|row| looks_like_header(row))
        .unwrap_or(0)
}

fn looks_like_header(row: &[CellValue]) -> bool {
    let filled: Vec<String> = row
        .iter()
        .filter(|cell| !cell.is_blank())
        .filter_map(CellValue::as_text)
        .collect();

    let alpha = filled
        .iter()
        .filter(|s| s.chars().any(|c| c.is_ascii_alphabetic()))
        .count();

    filled.len() >= MIN_FILLED_CELLS && alpha >= MIN_ALPHA_CELLS
}
