//! End-to-end run: discover → normalize → combine → clean → resolve cities
//! → filter by month → write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::city::{self, CityPolicy, PlaceLookup};
use crate::clean::{self, PledgeRecord};
use crate::error::PipelineError;
use crate::header::{self, DEFAULT_SCAN_ROWS};
use crate::output::{self, DEFAULT_SHEET_NAME};
use crate::reference::{self, ArchiveFetcher, ReferenceConfig};
use crate::schema::{self, CombinedRecord, Normalized, SkippedFile, SynonymTable};
use crate::stats::{FileSummary, RunReport};
use crate::table::{self, RawTable};

static YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub combined_output: PathBuf,
    pub final_output: PathBuf,
    pub start_month: String,
    pub end_month: String,
    pub header_scan_rows: usize,
    pub city_policy: CityPolicy,
    pub sheet_name: String,
    pub reference: ReferenceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("Data_raw_SDGE LIHEAP"),
            combined_output: PathBuf::from("data_clean/combined_raw_liheap_2023_2025.xlsx"),
            final_output: PathBuf::from("data_clean/liheap_clean_2023_2025.xlsx"),
            start_month: "2023-01".to_string(),
            end_month: "2025-06".to_string(),
            header_scan_rows: DEFAULT_SCAN_ROWS,
            city_policy: CityPolicy::LegacySentinel,
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            reference: ReferenceConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn month_range(&self) -> Result<MonthRange> {
        MonthRange::new(&self.start_month, &self.end_month)
    }
}

/// Inclusive `[start, end]` range of `YYYY-MM` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthRange {
    start: String,
    end: String,
}

impl MonthRange {
    pub fn new(start: &str, end: &str) -> Result<Self> {
        for bound in [start, end] {
            if !YEAR_MONTH.is_match(bound) {
                return Err(PipelineError::InvalidMonth(bound.to_string()).into());
            }
        }
        if start > end {
            return Err(PipelineError::EmptyMonthRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }
        Ok(Self {
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    /// Text comparison works because both sides are zero-padded `YYYY-MM`.
    pub fn contains(&self, year_month: &str) -> bool {
        self.start.as_str() <= year_month && year_month <= self.end.as_str()
    }
}

/// Row of the final dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRecord {
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "Zip_Code")]
    pub zip_code: Option<String>,
    #[serde(rename = "YearMo")]
    pub year_month: String,
    #[serde(rename = "Pledge_Amount")]
    pub pledge_amount: Option<f64>,
}

/// Keeps records whose month falls in `range` and projects them to the
/// final schema. Records without a parsable date are dropped.
pub fn filter_months(records: &[PledgeRecord], range: &MonthRange) -> Vec<FinalRecord> {
    records
        .iter()
        .filter_map(|r| {
            let ym = r.year_month.as_deref()?;
            range.contains(ym).then(|| FinalRecord {
                city: r.city.clone(),
                zip_code: r.zip_code.clone(),
                year_month: ym.to_string(),
                pledge_amount: r.pledge_amount,
            })
        })
        .collect()
}

/// Normalized output of every input file.
#[derive(Debug, Default)]
pub struct Combined {
    pub records: Vec<CombinedRecord>,
    pub files: Vec<FileSummary>,
    pub skipped: Vec<SkippedFile>,
}

/// Reads one workbook, detects its header and normalizes it.
#[tracing::instrument(skip(synonyms), fields(file = %path.display()))]
pub fn load_file(
    path: &Path,
    synonyms: &SynonymTable,
    scan_rows: usize,
) -> Result<(usize, Normalized)> {
    let grid = table::read_first_sheet(path)?;
    let header_row = header::detect_header_row(&grid, scan_rows);
    info!(header_row, "Detected header row");

    let raw = RawTable::from_grid(grid, header_row);
    Ok((header_row, schema::normalize_table(raw, synonyms, &table::file_name(path))))
}

/// Normalizes `files` in order and concatenates the survivors.
///
/// Fails with [`PipelineError::NoValidFiles`] when every file is skipped.
pub fn combine_files(
    files: &[PathBuf],
    synonyms: &SynonymTable,
    scan_rows: usize,
) -> Result<Combined> {
    let mut combined = Combined::default();

    for path in files {
        let file_name = table::file_name(path);
        info!(file = %file_name, "Processing file");

        let (header_row, normalized) = load_file(path, synonyms, scan_rows)?;
        let rows = match normalized {
            Normalized::Records(records) => {
                let n = records.len();
                combined.records.extend(records);
                Some(n)
            }
            Normalized::Skipped(skipped) => {
                info!(file = %file_name, missing = ?skipped.missing, "Skipping file (missing required columns)");
                combined.skipped.push(skipped);
                None
            }
        };
        combined.files.push(FileSummary {
            file_name,
            header_row,
            rows,
        });
    }

    if combined.files.iter().all(|f| f.rows.is_none()) {
        return Err(PipelineError::NoValidFiles.into());
    }
    Ok(combined)
}

/// Runs the full pipeline, writing both artifacts.
///
/// The postal reference is only acquired when some city is missing after
/// cleaning.
#[tracing::instrument(skip_all, fields(input = %config.input_dir.display()))]
pub async fn run_pipeline<F: ArchiveFetcher + ?Sized>(
    config: &PipelineConfig,
    synonyms: &SynonymTable,
    fetcher: &F,
) -> Result<RunReport> {
    let range = config.month_range()?;

    let files = table::discover_spreadsheets(&config.input_dir)?;
    let sample: Vec<String> = files.iter().take(5).map(|p| table::file_name(p)).collect();
    info!(count = files.len(), sample = ?sample, "Spreadsheet files found");

    let combined = combine_files(&files, synonyms, config.header_scan_rows)?;
    info!(rows = combined.records.len(), "Combined normalized records");

    output::write_combined(&config.combined_output, &combined.records)
        .context("Failed to write combined artifact")?;

    let mut pledges = clean::clean_records(&combined.records);
    debug!(rows = pledges.len(), "Cleaned ZIP, date and amount fields");

    let outcome = if city::count_missing(&pledges) > 0 {
        Some(reference::acquire_reference(fetcher, &config.reference).await)
    } else {
        None
    };
    let lookup = outcome
        .as_ref()
        .and_then(|o| o.reference())
        .map(|r| r as &dyn PlaceLookup);
    let cities = city::resolve_cities(&mut pledges, lookup, config.city_policy);

    let final_rows = filter_months(&pledges, &range);
    info!(
        start = %config.start_month,
        end = %config.end_month,
        rows = final_rows.len(),
        "Filtered to month range"
    );

    output::write_final(&config.final_output, &final_rows, &config.sheet_name)
        .context("Failed to write final artifact")?;

    Ok(RunReport {
        files_found: files.len(),
        sample_files: sample,
        files: combined.files,
        skipped: combined.skipped,
        rows_combined: combined.records.len(),
        cities,
        reference: outcome
            .as_ref()
            .map_or("not_needed", |o| o.kind())
            .to_string(),
        reference_zip_codes: lookup_size(outcome.as_ref()),
        start_month: config.start_month.clone(),
        end_month: config.end_month.clone(),
        rows_in_range: final_rows.len(),
        combined_output: config.combined_output.clone(),
        final_output: config.final_output.clone(),
    })
}

fn lookup_size(outcome: Option<&reference::ReferenceOutcome>) -> usize {
    outcome
        .and_then(|o| o.reference())
        .map_or(0, |r| r.len())
}
