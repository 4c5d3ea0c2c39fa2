//! Column-name normalization onto the canonical pledge schema.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::table::{CellValue, RawTable};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// The four fields every normalized record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    City,
    ZipCode,
    CreatedOn,
    PledgeAmount,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 4] = [
        CanonicalField::City,
        CanonicalField::ZipCode,
        CanonicalField::CreatedOn,
        CanonicalField::PledgeAmount,
    ];

    /// Fields whose absence makes a file unusable, in reporting order.
    pub const REQUIRED: [CanonicalField; 3] = [
        CanonicalField::ZipCode,
        CanonicalField::CreatedOn,
        CanonicalField::PledgeAmount,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            CanonicalField::City => "City",
            CanonicalField::ZipCode => "Zip_Code",
            CanonicalField::CreatedOn => "Created_On",
            CanonicalField::PledgeAmount => "Pledge_Amount",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const DEFAULT_SYNONYMS: &[(&str, CanonicalField)] = &[
    ("CV_EnergyAssistance[City(Service Address)]", CanonicalField::City),
    ("Service City", CanonicalField::City),
    ("City", CanonicalField::City),
    ("CV_EnergyAssistance[Post Code (Service Address)]", CanonicalField::ZipCode),
    ("CV_EnergyAssistance[Zipcode (Business Partner Address)]", CanonicalField::ZipCode),
    ("Zipcode (Business Partner Address)", CanonicalField::ZipCode),
    ("Zip Code", CanonicalField::ZipCode),
    ("ZIP", CanonicalField::ZipCode),
    ("Zip_Code", CanonicalField::ZipCode),
    ("CV_EnergyAssistance[created On (Pledge Details)]", CanonicalField::CreatedOn),
    ("CV_EnergyAssistance[Created On (Pledge Details)]", CanonicalField::CreatedOn),
    ("CV_EnergyAssistance[Created on (MM/DD/YYYY)]", CanonicalField::CreatedOn),
    ("CV_EnergyAssistance[Created On (PL)]", CanonicalField::CreatedOn),
    ("Created_On", CanonicalField::CreatedOn),
    ("Created On", CanonicalField::CreatedOn),
    ("[Pledge_Amount]", CanonicalField::PledgeAmount),
    ("Pledge Amount", CanonicalField::PledgeAmount),
    ("Pledge_Amount", CanonicalField::PledgeAmount),
    ("CV_EnergyAssistance[Pledge Amount]", CanonicalField::PledgeAmount),
];

/// Exact-match mapping from raw column labels to canonical fields.
///
/// Built once and handed to [`normalize_table`]; it is never mutated.
/// A replacement table can be loaded from a JSON object on disk:
/// ```json
/// {
///   "Service City": "City",
///   "Postal": "Zip_Code"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SynonymTable {
    entries: HashMap<String, CanonicalField>,
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SYNONYMS
                .iter()
                .map(|(label, field)| (label.to_string(), *field))
                .collect(),
        }
    }
}

impl SynonymTable {
    /// Loads a table from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read synonym file {}", path.display()))?;
        let raw: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse synonym file {}", path.display()))?;
        Self::from_pairs(raw)
    }

    /// Builds a table from `(raw label, canonical label)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for (label, target) in pairs {
            let label = label.into();
            let field = CanonicalField::from_label(target.as_ref()).ok_or_else(|| {
                PipelineError::UnknownCanonicalField {
                    label: label.clone(),
                    target: target.as_ref().to_string(),
                }
            })?;
            entries.insert(label, field);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, label: &str) -> Option<CanonicalField> {
        self.entries.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites `label` to its canonical name, or returns it unchanged.
    pub fn rename(&self, label: &str) -> String {
        match self.get(label) {
            Some(field) => field.label().to_string(),
            None => label.to_string(),
        }
    }
}

/// Trims a column label and collapses internal whitespace runs.
pub fn clean_label(label: &str) -> String {
    WHITESPACE.replace_all(label.trim(), " ").into_owned()
}

/// One normalized row before any value cleaning; the combined artifact
/// holds exactly these.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRecord {
    pub city: CellValue,
    pub zip_code: CellValue,
    pub created_on: CellValue,
    pub pledge_amount: CellValue,
    pub source_file: String,
}

/// A file left out of the run, with the required fields it lacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub file_name: String,
    pub missing: Vec<String>,
}

#[derive(Debug)]
pub enum Normalized {
    Records(Vec<CombinedRecord>),
    Skipped(SkippedFile),
}

/// Renames `table`'s columns through `synonyms` and projects its rows onto
/// the canonical schema.
///
/// Files missing any of `Zip_Code`, `Created_On` or `Pledge_Amount` are
/// returned as [`Normalized::Skipped`]; a missing `City` column is filled
/// with empty cells.
#[tracing::instrument(level = "debug", skip(table, synonyms), fields(columns = table.headers.len()))]
pub fn normalize_table(table: RawTable, synonyms: &SynonymTable, file_name: &str) -> Normalized {
    let headers: Vec<String> = table
        .headers
        .iter()
        .map(|h| synonyms.rename(&clean_label(h)))
        .collect();
    info!(file = file_name, columns = ?headers, "Columns after rename");

    let index_of = |field: CanonicalField| headers.iter().position(|h| h == field.label());

    let missing: Vec<String> = CanonicalField::REQUIRED
        .into_iter()
        .filter(|f| index_of(*f).is_none())
        .map(|f| f.label().to_string())
        .collect();
    if !missing.is_empty() {
        return Normalized::Skipped(SkippedFile {
            file_name: file_name.to_string(),
            missing,
        });
    }

    let city = index_of(CanonicalField::City);
    if city.is_none() {
        debug!(file = file_name, "No City column; filling with empty cells");
    }
    let zip = index_of(CanonicalField::ZipCode);
    let created = index_of(CanonicalField::CreatedOn);
    let amount = index_of(CanonicalField::PledgeAmount);

    let cell = |row: &[CellValue], idx: Option<usize>| {
        idx.and_then(|i| row.get(i)).cloned().unwrap_or_default()
    };

    let records = table
        .rows
        .iter()
        .map(|row| CombinedRecord {
            city: cell(row, city),
            zip_code: cell(row, zip),
            created_on: cell(row, created),
            pledge_amount: cell(row, amount),
            source_file: file_name.to_string(),
        })
        .collect();

    Normalized::Records(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: Vec<Vec<CellValue>>) -> RawTable {
        RawTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_clean_label_collapses_whitespace() {
        assert_eq!(clean_label("  Zip   Code "), "Zip Code");
        assert_eq!(clean_label("Created\n On"), "Created On");
    }

    #[test]
    fn test_default_table_maps_known_variants() {
        let synonyms = SynonymTable::default();
        assert_eq!(
            synonyms.get("CV_EnergyAssistance[Post Code (Service Address)]"),
            Some(CanonicalField::ZipCode)
        );
        assert_eq!(synonyms.rename("[Pledge_Amount]"), "Pledge_Amount");
        assert_eq!(synonyms.rename("Account Number"), "Account Number");
    }

    #[test]
    fn test_from_pairs_rejects_unknown_target() {
        let err = SynonymTable::from_pairs([("Postal", "Zip")]).unwrap_err();
        assert!(err.to_string().contains("Zip"));

        let ok = SynonymTable::from_pairs([("Postal", "Zip_Code")]).unwrap();
        assert_eq!(ok.get("Postal"), Some(CanonicalField::ZipCode));
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.json");
        std::fs::write(&path, r#"{"Town": "City", "Amt": "Pledge_Amount"}"#).unwrap();

        let synonyms = SynonymTable::load(&path).unwrap();
        assert_eq!(synonyms.get("Town"), Some(CanonicalField::City));
        assert_eq!(synonyms.get("City"), None);
    }

    #[test]
    fn test_normalize_projects_and_tags_source() {
        let raw = table(
            &["Account", "Service  City", "ZIP", "Created On", "Pledge Amount"],
            vec![vec![
                text("A-1"),
                text("Vista"),
                CellValue::Number(92083.0),
                CellValue::Number(20230415.0),
                text("$10.00"),
            ]],
        );

        let Normalized::Records(records) =
            normalize_table(raw, &SynonymTable::default(), "jan.xlsx")
        else {
            panic!("expected records");
        };

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].city, text("Vista"));
        assert_eq!(records[0].zip_code, CellValue::Number(92083.0));
        assert_eq!(records[0].pledge_amount, text("$10.00"));
        assert_eq!(records[0].source_file, "jan.xlsx");
    }

    #[test]
    fn test_missing_city_is_synthesized() {
        let raw = table(
            &["Zip_Code", "Created_On", "Pledge_Amount"],
            vec![vec![text("92101"), text("2023-01-01"), text("5")]],
        );

        let Normalized::Records(records) = normalize_table(raw, &SynonymTable::default(), "f.xlsx")
        else {
            panic!("expected records");
        };
        assert_eq!(records[0].city, CellValue::Empty);
    }

    #[test]
    fn test_missing_required_columns_are_reported_in_order() {
        let raw = table(&["City", "Notes"], vec![]);

        match normalize_table(raw, &SynonymTable::default(), "bad.xlsx") {
            Normalized::Skipped(skipped) => {
                assert_eq!(skipped.file_name, "bad.xlsx");
                assert_eq!(
                    skipped.missing,
                    vec!["Zip_Code", "Created_On", "Pledge_Amount"]
                );
            }
            Normalized::Records(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn test_short_rows_yield_empty_cells_and_first_duplicate_wins() {
        let raw = table(
            &["ZIP", "Zip Code", "Created On", "Pledge Amount"],
            vec![vec![text("92101"), text("99999")]],
        );

        let Normalized::Records(records) = normalize_table(raw, &SynonymTable::default(), "f.xlsx")
        else {
            panic!("expected records");
        };
        assert_eq!(records[0].zip_code, text("92101"));
        assert_eq!(records[0].created_on, CellValue::Empty);
        assert_eq!(records[0].pledge_amount, CellValue::Empty);
    }
}
