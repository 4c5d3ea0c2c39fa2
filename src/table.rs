//! Spreadsheet loading.
//!
//! Workbooks are read with `calamine` and converted once into [`CellValue`]
//! so the rest of the crate never touches the reader's types.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, open_workbook_auto};
use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::PipelineError;

/// One spreadsheet cell, detached from the workbook reader.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// `true` for empty cells and text that is only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering used by the cleaners; `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            // integral floats render without a fractional part ("92101", not "92101.0")
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(naive) => CellValue::DateTime(naive),
                None => CellValue::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(_) => CellValue::Empty,
        }
    }
}

/// A sheet after header detection: labels plus the data rows below them.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    /// Splits `grid` at `header_row`: that row becomes the labels, later
    /// rows the data. Blank header cells get pandas-style `Unnamed: N` names
    /// and entirely blank data rows are dropped.
    pub fn from_grid(grid: Vec<Vec<CellValue>>, header_row: usize) -> Self {
        let mut rows = grid.into_iter().skip(header_row);
        let header_cells = rows.next().unwrap_or_default();

        let headers = header_cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match cell.as_text() {
                Some(label) if !label.trim().is_empty() => label,
                _ => format!("Unnamed: {i}"),
            })
            .collect();

        let rows = rows
            .filter(|row| !row.iter().all(CellValue::is_blank))
            .collect();

        Self { headers, rows }
    }

    /// Index of the first column labelled `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Reads every row of the first worksheet of `path`.
pub fn read_first_sheet(path: &Path) -> Result<Vec<Vec<CellValue>>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("Workbook {} has no worksheets", path.display()))?
        .with_context(|| format!("Failed to read first worksheet of {}", path.display()))?;

    let grid: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| row.iter().map(CellValue::from).collect())
        .collect();

    debug!(path = %path.display(), rows = grid.len(), "Worksheet loaded");
    Ok(grid)
}

/// Prefix Excel gives the lock file of an open workbook.
const LOCK_FILE_PREFIX: &str = "~$";

/// Finds `*.xls*` files anywhere below `dir`, sorted by file name.
///
/// Excel lock files (`~$name.xlsx`) are ignored.
pub fn discover_spreadsheets(dir: &Path) -> Result<Vec<PathBuf>> {
    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = Path::new(&root).join("**").join("*.xls*");
    let pattern = pattern.to_string_lossy();

    let mut files = Vec::new();
    for entry in glob::glob(&pattern).context("Invalid input directory pattern")? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        if file_name(&path).starts_with(LOCK_FILE_PREFIX) {
            debug!(path = %path.display(), "Ignoring Excel lock file");
            continue;
        }
        files.push(path);
    }

    if files.is_empty() {
        return Err(PipelineError::NoInputFiles(dir.to_path_buf()).into());
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// File name used for provenance and logging.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
