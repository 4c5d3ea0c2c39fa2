//! CLI entry point for the pledge combiner.
//!
//! `run` normalizes a directory of pledge exports into one cleaned dataset;
//! `download-reference` caches a country's GeoNames postal-code file.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pledge_combiner::{
    city::CityPolicy,
    fetch::BasicClient,
    header::DEFAULT_SCAN_ROWS,
    output::{DEFAULT_SHEET_NAME, print_json},
    pipeline::{PipelineConfig, run_pipeline},
    reference::{
        DEFAULT_BASE_URL, DEFAULT_COUNTRY, DOWNLOAD_TIMEOUT, HttpArchiveFetcher, ReferenceConfig,
        ReferenceStrategy, download_reference,
    },
    schema::SynonymTable,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "pledge_combiner")]
#[command(about = "Combine and clean energy-assistance pledge exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize, clean and combine a directory of spreadsheet exports
    Run(RunArgs),
    /// Download and cache the GeoNames postal-code file for a country
    DownloadReference {
        /// Two-letter country code (e.g. US, CA, VN)
        #[arg(value_name = "COUNTRY_CODE")]
        country: String,

        /// Directory to save the archive and extracted files
        #[arg(short, long, default_value = "data_geonames")]
        out_dir: PathBuf,

        /// Base URL of the postal-code export directory
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory searched recursively for *.xls* files
    #[arg(short, long, default_value = "Data_raw_SDGE LIHEAP")]
    input_dir: PathBuf,

    /// Combined (uncleaned) output; .xlsx or .csv
    #[arg(long, default_value = "data_clean/combined_raw_liheap_2023_2025.xlsx")]
    combined_output: PathBuf,

    /// Final cleaned output; .xlsx or .csv
    #[arg(short, long, default_value = "data_clean/liheap_clean_2023_2025.xlsx")]
    output: PathBuf,

    /// First month kept (YYYY-MM, inclusive)
    #[arg(long, default_value = "2023-01")]
    start: String,

    /// Last month kept (YYYY-MM, inclusive)
    #[arg(long, default_value = "2025-06")]
    end: String,

    /// Rows inspected when looking for the header row
    #[arg(long, default_value_t = DEFAULT_SCAN_ROWS)]
    header_scan_rows: usize,

    /// JSON file replacing the built-in column synonym table
    #[arg(long)]
    synonyms: Option<PathBuf>,

    /// Where stage-two city lookups come from
    #[arg(long, value_enum, default_value_t = ReferenceStrategy::Remote)]
    lookup: ReferenceStrategy,

    /// Country whose postal-code reference is used
    #[arg(long, default_value = DEFAULT_COUNTRY)]
    country: String,

    /// Directory holding the cached reference ({COUNTRY}.txt)
    #[arg(long, default_value = "data_geonames")]
    reference_dir: PathBuf,

    /// Base URL of the postal-code export directory
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Timeout for the remote reference fetch, in seconds
    #[arg(long, default_value_t = 10)]
    fetch_timeout: u64,

    /// How unresolved cities are written
    #[arg(long, value_enum, default_value_t = CityPolicy::LegacySentinel)]
    city_policy: CityPolicy,

    /// Sheet name of the final workbook
    #[arg(long, default_value = DEFAULT_SHEET_NAME)]
    sheet_name: String,
}

impl RunArgs {
    fn into_config(self) -> PipelineConfig {
        PipelineConfig {
            input_dir: self.input_dir,
            combined_output: self.combined_output,
            final_output: self.output,
            start_month: self.start,
            end_month: self.end,
            header_scan_rows: self.header_scan_rows,
            city_policy: self.city_policy,
            sheet_name: self.sheet_name,
            reference: ReferenceConfig {
                strategy: self.lookup,
                country: self.country,
                cache_dir: self.reference_dir,
                base_url: self.base_url,
                timeout: Duration::from_secs(self.fetch_timeout),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/pledge_combiner.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("pledge_combiner.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let synonyms = match &args.synonyms {
                Some(path) => SynonymTable::load(path)?,
                None => SynonymTable::default(),
            };
            info!(entries = synonyms.len(), "Synonym table loaded");

            let config = args.into_config();
            let client = BasicClient::with_timeout(config.reference.timeout)?;
            let fetcher = HttpArchiveFetcher::new(client, config.reference.base_url.clone());

            let report = run_pipeline(&config, &synonyms, &fetcher).await?;
            print_json(&report)?;
            report.log_summary();
        }
        Commands::DownloadReference {
            country,
            out_dir,
            base_url,
        } => {
            let client = BasicClient::with_timeout(DOWNLOAD_TIMEOUT)?;
            let fetcher = HttpArchiveFetcher::new(client, base_url);

            let summary = download_reference(&fetcher, &country, &out_dir).await?;
            print_json(&summary)?;
        }
    }

    Ok(())
}
