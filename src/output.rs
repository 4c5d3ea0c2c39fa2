//! Persistence for the combined and final datasets.
//!
//! Both artifacts are written as xlsx unless the path ends in `.csv`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Workbook, Worksheet};
use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::FinalRecord;
use crate::schema::{CanonicalField, CombinedRecord};
use crate::table::CellValue;

pub const COMBINED_COLUMNS: [&str; 5] = [
    CanonicalField::City.label(),
    CanonicalField::ZipCode.label(),
    CanonicalField::CreatedOn.label(),
    CanonicalField::PledgeAmount.label(),
    "SourceFile",
];

pub const FINAL_COLUMNS: [&str; 4] = ["City", "Zip_Code", "YearMo", "Pledge_Amount"];

pub const DEFAULT_SHEET_NAME: &str = "LIHEAP_Data";

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Workbook with a fixed creation timestamp so identical data produces
/// identical files.
fn new_workbook() -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let created = ExcelDateTime::from_ymd(2000, 1, 1)?;
    let properties = DocProperties::new().set_creation_datetime(&created);
    workbook.set_properties(&properties);
    Ok(workbook)
}

fn write_header(sheet: &mut Worksheet, columns: &[&str], bold: &Format) -> Result<()> {
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, bold)?;
    }
    Ok(())
}

fn write_cell(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &CellValue,
    date_format: &Format,
) -> Result<()> {
    match cell {
        CellValue::Empty => {}
        CellValue::Text(s) => {
            sheet.write_string(row, col, s)?;
        }
        CellValue::Number(n) => {
            sheet.write_number(row, col, *n)?;
        }
        CellValue::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        CellValue::DateTime(dt) => {
            sheet.write_datetime_with_format(row, col, dt, date_format)?;
        }
    }
    Ok(())
}

/// Writes the concatenated, not-yet-cleaned records.
#[tracing::instrument(skip(records), fields(rows = records.len()))]
pub fn write_combined(path: &Path, records: &[CombinedRecord]) -> Result<()> {
    ensure_parent(path)?;

    if is_csv(path) {
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(COMBINED_COLUMNS)?;
        for r in records {
            writer.write_record([
                r.city.to_string(),
                r.zip_code.to_string(),
                r.created_on.to_string(),
                r.pledge_amount.to_string(),
                r.source_file.clone(),
            ])?;
        }
        writer.flush()?;
    } else {
        let mut workbook = new_workbook()?;
        let bold = Format::new().set_bold();
        let date_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let sheet = workbook.add_worksheet();
        write_header(sheet, &COMBINED_COLUMNS, &bold)?;

        for (i, r) in records.iter().enumerate() {
            let row = i as u32 + 1;
            write_cell(sheet, row, 0, &r.city, &date_format)?;
            write_cell(sheet, row, 1, &r.zip_code, &date_format)?;
            write_cell(sheet, row, 2, &r.created_on, &date_format)?;
            write_cell(sheet, row, 3, &r.pledge_amount, &date_format)?;
            sheet.write_string(row, 4, &r.source_file)?;
        }

        workbook
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }

    info!(path = %path.display(), rows = records.len(), "Combined normalized file saved");
    Ok(())
}

/// Writes the final dataset. In xlsx output the ZIP column is text-formatted
/// so leading zeros survive.
#[tracing::instrument(skip(records), fields(rows = records.len()))]
pub fn write_final(path: &Path, records: &[FinalRecord], sheet_name: &str) -> Result<()> {
    ensure_parent(path)?;

    if is_csv(path) {
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for r in records {
            writer.serialize(r)?;
        }
        if records.is_empty() {
            writer.write_record(FINAL_COLUMNS)?;
        }
        writer.flush()?;
    } else {
        let mut workbook = new_workbook()?;
        let bold = Format::new().set_bold();
        let text = Format::new().set_num_format("@");
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name)?;
        write_header(sheet, &FINAL_COLUMNS, &bold)?;

        for (i, r) in records.iter().enumerate() {
            let row = i as u32 + 1;
            if let Some(city) = &r.city {
                sheet.write_string(row, 0, city)?;
            }
            match &r.zip_code {
                Some(zip) => sheet.write_string_with_format(row, 1, zip, &text)?,
                None => sheet.write_blank(row, 1, &text)?,
            };
            sheet.write_string(row, 2, &r.year_month)?;
            if let Some(amount) = r.pledge_amount {
                sheet.write_number(row, 3, amount)?;
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }

    debug!(sheet = sheet_name, "Final workbook written");
    info!(path = %path.display(), rows = records.len(), "Final cleaned file saved");
    Ok(())
}
