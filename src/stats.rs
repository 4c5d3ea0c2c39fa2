use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::city::ResolutionCounts;
use crate::schema::SkippedFile;

/// Header row detected for one input file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileSummary {
    pub file_name: String,
    pub header_row: usize,
    pub rows: Option<usize>,
}

/// Everything a run did, in order.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub files_found: usize,
    /// First few discovered file names.
    pub sample_files: Vec<String>,
    pub files: Vec<FileSummary>,
    pub skipped: Vec<SkippedFile>,
    pub rows_combined: usize,
    pub cities: ResolutionCounts,
    pub reference: String,
    pub reference_zip_codes: usize,
    pub start_month: String,
    pub end_month: String,
    pub rows_in_range: usize,
    pub combined_output: PathBuf,
    pub final_output: PathBuf,
}

impl RunReport {
    /// Files that made it into the combined dataset.
    pub fn files_normalized(&self) -> usize {
        self.files.iter().filter(|f| f.rows.is_some()).count()
    }

    /// Logs the closing summary, including every skipped file.
    pub fn log_summary(&self) {
        info!(
            files_found = self.files_found,
            files_normalized = self.files_normalized(),
            rows_combined = self.rows_combined,
            rows_in_range = self.rows_in_range,
            reference = %self.reference,
            "Run complete"
        );

        if !self.skipped.is_empty() {
            warn!(count = self.skipped.len(), "Skipped files (missing required columns)");
            for skipped in &self.skipped {
                warn!(file = %skipped.file_name, missing = ?skipped.missing, "Skipped file");
            }
        }
    }
}
