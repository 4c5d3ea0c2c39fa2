//! Value coercion for ZIP, date and amount cells.
//!
//! Every cleaner is total: malformed input becomes `None`, never an error.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::schema::CombinedRecord;
use crate::table::CellValue;

static FIVE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5}").expect("valid regex"));
static SHORT_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,4}").expect("valid regex"));
static NOT_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.\-]").expect("valid regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%Y%m%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%m/%d/%y",
    "%m-%d-%y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
];

/// chrono's `%Y` also accepts one to three digits, so `"1/5/24"` would
/// otherwise land in year 24 and never reach the `%y` layouts.
const MIN_FULL_YEAR: i32 = 1000;

fn full_year(date: NaiveDate) -> bool {
    date.year() >= MIN_FULL_YEAR
}

/// A pledge after value cleaning. City resolution fills `city` in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PledgeRecord {
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub created_on: Option<NaiveDate>,
    pub year_month: Option<String>,
    pub pledge_amount: Option<f64>,
    pub source_file: String,
}

impl PledgeRecord {
    pub fn from_combined(record: &CombinedRecord) -> Self {
        let created_on = parse_date(&record.created_on);
        Self {
            city: record.city.as_text(),
            zip_code: clean_zip(&record.zip_code),
            year_month: created_on.map(year_month),
            created_on,
            pledge_amount: clean_amount(&record.pledge_amount),
            source_file: record.source_file.clone(),
        }
    }
}

/// Cleans every combined record, preserving order.
pub fn clean_records(records: &[CombinedRecord]) -> Vec<PledgeRecord> {
    records.iter().map(PledgeRecord::from_combined).collect()
}

/// Normalizes a postal code to five digits.
///
/// A trailing `.0` from numeric cells is dropped, then the first run of five
/// digits is taken. Without one, the first shorter digit run is left-padded
/// with zeros (`"123"` → `"00123"`).
pub fn clean_zip(cell: &CellValue) -> Option<String> {
    let raw = cell.as_text()?;
    let raw = raw.strip_suffix(".0").unwrap_or(&raw);

    if let Some(m) = FIVE_DIGITS.find(raw) {
        return Some(m.as_str().to_string());
    }
    SHORT_DIGITS
        .find(raw)
        .map(|m| format!("{:0>5}", m.as_str()))
}

/// Parses a pledge date.
///
/// Numeric cells are read as `YYYYMMDD` integers, spreadsheet date cells
/// keep their date, and text goes through [`parse_date_text`].
pub fn parse_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Empty | CellValue::Bool(_) => None,
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Number(n) => {
            if !n.is_finite() {
                return None;
            }
            let digits = format!("{}", n.trunc() as i64);
            NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
        }
        CellValue::Text(s) => parse_date_text(s),
    }
}

/// Best-effort parsing of a textual date across the layouts seen in
/// exports. Time components are accepted and discarded.
pub fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(d) = DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .find(|d| full_year(*d))
    {
        return Some(d);
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .find(|dt| full_year(dt.date()))
    {
        return Some(dt.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// `YYYY-MM` key used for range filtering.
pub fn year_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Parses a monetary amount after dropping everything but digits, `.` and `-`.
pub fn clean_amount(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Number(_) | CellValue::Empty => None,
        other => {
            let text = other.as_text()?;
            let stripped = NOT_NUMERIC.replace_all(&text, "");
            stripped.parse::<f64>().ok()
        }
    }
}
