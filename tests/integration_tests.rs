use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use calamine::{Data, Reader, open_workbook_auto};
use pledge_combiner::city::CityPolicy;
use pledge_combiner::error::PipelineError;
use pledge_combiner::pipeline::{PipelineConfig, run_pipeline};
use pledge_combiner::reference::{ArchiveFetcher, ReferenceConfig, ReferenceStrategy};
use pledge_combiner::schema::SynonymTable;
use rust_xlsxwriter::Workbook;
use zip::write::SimpleFileOptions;

enum Cell<'a> {
    S(&'a str),
    N(f64),
    Blank,
}

use Cell::{Blank, N, S};

fn write_workbook(path: &Path, rows: &[Vec<Cell>]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let (r, c) = (r as u32, c as u16);
            match cell {
                S(s) => {
                    sheet.write_string(r, c, *s).unwrap();
                }
                N(n) => {
                    sheet.write_number(r, c, *n).unwrap();
                }
                Blank => {}
            }
        }
    }
    workbook.save(path).unwrap();
}

/// One export with a banner above the header, one missing the amount column.
fn write_inputs(dir: &Path) {
    write_workbook(
        &dir.join("01_jan.xlsx"),
        &[
            vec![S("SDG&E LIHEAP Pledge Export")],
            vec![],
            vec![
                S("CV_EnergyAssistance[City(Service Address)]"),
                S("CV_EnergyAssistance[Post Code (Service Address)]"),
                S("CV_EnergyAssistance[Created On (Pledge Details)]"),
                S("CV_EnergyAssistance[Pledge Amount]"),
                S("Account"),
            ],
            vec![S("San Diego"), N(92101.0), N(20230105.0), S("$1,250.50"), S("A1")],
            vec![S("SAN DIEGO"), S("92101.0"), S("2023-02-10"), N(300.0), S("A2")],
            vec![Blank, N(92101.0), N(20230301.0), S("75"), S("A3")],
            vec![S("Vista"), N(92083.0), S("12/31/2022"), S("$20"), S("A4")],
            vec![S("nan"), N(2108.0), S("01/01/2023"), S("$40"), S("A5")],
            vec![S("Chula Vista"), N(91910.0), S("not a date"), S("$10"), S("A6")],
        ],
    );

    write_workbook(
        &dir.join("02_feb.xlsx"),
        &[
            vec![S("City"), S("Zip Code"), S("Created On")],
            vec![S("Vista"), N(92083.0), N(20230201.0)],
        ],
    );
}

struct FakeFetcher(Option<Vec<u8>>);

#[async_trait]
impl ArchiveFetcher for FakeFetcher {
    async fn fetch_archive(&self, _country: &str) -> Result<Vec<u8>> {
        self.0.clone().ok_or_else(|| anyhow!("network unreachable"))
    }
}

fn reference_archive() -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        zip.start_file("US.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(
            b"US\t02108\tBoston\tMassachusetts\tMA\tSuffolk\t025\t\t\t42.3576\t-71.0684\t4\n",
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn config(root: &Path, final_name: &str) -> PipelineConfig {
    PipelineConfig {
        input_dir: root.join("input"),
        combined_output: root.join("out").join("combined.xlsx"),
        final_output: root.join("out").join(final_name),
        reference: ReferenceConfig {
            strategy: ReferenceStrategy::Remote,
            cache_dir: root.join("geonames"),
            ..ReferenceConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn setup() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    write_inputs(&input);
    (root, input)
}

#[tokio::test]
async fn test_full_pipeline_with_fetched_reference() {
    let (root, _) = setup();
    let config = config(root.path(), "final.csv");
    let fetcher = FakeFetcher(Some(reference_archive()));

    let report = run_pipeline(&config, &SynonymTable::default(), &fetcher)
        .await
        .expect("pipeline run");

    assert_eq!(report.files_found, 2);
    assert_eq!(report.sample_files, vec!["01_jan.xlsx", "02_feb.xlsx"]);
    assert_eq!(report.files_normalized(), 1);
    assert_eq!(report.files[0].header_row, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].file_name, "02_feb.xlsx");
    assert_eq!(report.skipped[0].missing, vec!["Pledge_Amount"]);
    assert_eq!(report.rows_combined, 6);
    assert_eq!(report.reference, "fetched");
    assert_eq!(report.cities.missing_before, 2);
    assert_eq!(report.cities.missing_after_internal, 1);
    assert_eq!(report.cities.missing_after_reference, 0);
    assert_eq!(report.rows_in_range, 4);

    assert!(config.combined_output.exists());

    let content = std::fs::read_to_string(&config.final_output).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "City,Zip_Code,YearMo,Pledge_Amount",
            "SAN DIEGO,92101,2023-01,1250.5",
            "SAN DIEGO,92101,2023-02,300.0",
            "SAN DIEGO,92101,2023-03,75.0",
            "BOSTON,02108,2023-01,40.0",
        ]
    );
}

#[tokio::test]
async fn test_unavailable_reference_leaves_nan_sentinel() {
    let (root, _) = setup();
    let config = config(root.path(), "final.csv");

    let report = run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(None))
        .await
        .unwrap();

    assert_eq!(report.reference, "unavailable");
    assert_eq!(report.cities.missing_after_reference, 1);
    let content = std::fs::read_to_string(&config.final_output).unwrap();
    assert!(content.lines().any(|l| l == "NAN,02108,2023-01,40.0"));
}

#[tokio::test]
async fn test_cached_reference_and_absent_policy() {
    let (root, _) = setup();
    let mut config = config(root.path(), "final.csv");
    config.reference.strategy = ReferenceStrategy::Cache;
    config.city_policy = CityPolicy::Absent;

    let report = run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(None))
        .await
        .unwrap();
    assert_eq!(report.reference, "unavailable");
    let content = std::fs::read_to_string(&config.final_output).unwrap();
    assert!(content.lines().any(|l| l == ",02108,2023-01,40.0"));

    std::fs::create_dir_all(&config.reference.cache_dir).unwrap();
    std::fs::write(
        config.reference.cache_path(),
        "US\t02108\tBoston\tMassachusetts\tMA\t\t\t\t\t0\t0\t4\n",
    )
    .unwrap();

    let report = run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(None))
        .await
        .unwrap();
    assert_eq!(report.reference, "cache_hit");
    assert_eq!(report.reference_zip_codes, 1);
}

#[tokio::test]
async fn test_rerun_is_byte_identical() {
    let (root, _) = setup();
    let first = config(root.path(), "first.csv");
    let second = config(root.path(), "second.csv");
    let synonyms = SynonymTable::default();

    run_pipeline(&first, &synonyms, &FakeFetcher(Some(reference_archive())))
        .await
        .unwrap();
    run_pipeline(&second, &synonyms, &FakeFetcher(Some(reference_archive())))
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(&first.final_output).unwrap(),
        std::fs::read(&second.final_output).unwrap()
    );
}

#[tokio::test]
async fn test_final_workbook_keeps_text_zip_codes() {
    let (root, _) = setup();
    let config = config(root.path(), "final.xlsx");

    run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(Some(reference_archive())))
        .await
        .unwrap();

    let mut workbook = open_workbook_auto(&config.final_output).unwrap();
    let range = workbook.worksheet_range("LIHEAP_Data").unwrap();
    assert_eq!(range.height(), 5);
    assert_eq!(range.get((0, 2)), Some(&Data::String("YearMo".into())));
    assert_eq!(range.get((4, 1)), Some(&Data::String("02108".into())));
    assert_eq!(range.get((4, 0)), Some(&Data::String("BOSTON".into())));

    let mut combined = open_workbook_auto(&config.combined_output).unwrap();
    let names = combined.sheet_names();
    let raw = combined.worksheet_range(&names[0]).unwrap();
    assert_eq!(raw.height(), 7);
    assert_eq!(raw.get((1, 4)), Some(&Data::String("01_jan.xlsx".into())));
    assert_eq!(raw.get((1, 3)), Some(&Data::String("$1,250.50".into())));
}

#[tokio::test]
async fn test_no_input_files_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("input")).unwrap();
    let config = config(root.path(), "final.csv");

    let err = run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(None))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::NoInputFiles(_))
    ));
}

#[tokio::test]
async fn test_all_files_skipped_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    write_workbook(
        &input.join("only.xlsx"),
        &[vec![S("City"), S("Notes"), S("Other")], vec![S("Vista"), S("x"), S("y")]],
    );
    let config = config(root.path(), "final.csv");

    let err = run_pipeline(&config, &SynonymTable::default(), &FakeFetcher(None))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::NoValidFiles)
    ));
    assert!(!config.combined_output.exists());
}

#[tokio::test]
async fn test_custom_synonyms_rescue_a_file() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    write_workbook(
        &input.join("custom.xlsx"),
        &[
            vec![S("Town"), S("Postal"), S("Pledged"), S("Amt")],
            vec![S("vista"), S("92083"), S("2024-03-15"), S("12.5")],
        ],
    );
    let mut config = config(root.path(), "final.csv");
    config.reference.strategy = ReferenceStrategy::Off;

    let synonyms = SynonymTable::from_pairs([
        ("Town", "City"),
        ("Postal", "Zip_Code"),
        ("Pledged", "Created_On"),
        ("Amt", "Pledge_Amount"),
    ])
    .unwrap();

    let report = run_pipeline(&config, &synonyms, &FakeFetcher(None))
        .await
        .unwrap();

    assert_eq!(report.reference, "not_needed");
    let content = std::fs::read_to_string(&config.final_output).unwrap();
    assert_eq!(content.lines().nth(1), Some("VISTA,92083,2024-03,12.5"));
}
