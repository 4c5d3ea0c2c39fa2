//! GeoNames postal-code reference: loading, acquisition and download.
//!
//! The reference is a tab-separated file with twelve columns
//! (`country, postal_code, place_name, admin_name1, admin_code1, admin_name2,
//! admin_code2, admin_name3, admin_code3, latitude, longitude, accuracy`),
//! published per country as `{CC}.zip` containing `{CC}.txt`. Only
//! `postal_code` and `place_name` are used.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::city::PlaceLookup;
use crate::error::PipelineError;
use crate::fetch::{HttpClient, fetch_bytes};

pub const DEFAULT_BASE_URL: &str = "https://download.geonames.org/export/zip";
pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const POSTAL_CODE_COL: usize = 1;
const PLACE_NAME_COL: usize = 2;

/// Where stage-two city lookups come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReferenceStrategy {
    /// Download the latest archive, falling back to the local copy.
    #[default]
    Remote,
    /// Only read the local copy.
    Cache,
    /// No external lookup.
    Off,
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub strategy: ReferenceStrategy,
    pub country: String,
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            strategy: ReferenceStrategy::Remote,
            country: DEFAULT_COUNTRY.to_string(),
            cache_dir: PathBuf::from("data_geonames"),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl ReferenceConfig {
    /// Local copy of the country file, e.g. `data_geonames/US.txt`.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}.txt", self.country.to_uppercase()))
    }
}

/// ZIP → place name table from a GeoNames file.
///
/// The first row for a postal code wins. Names are uppercased and, when a
/// row lists several comma-separated places, only the first is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostalReference {
    places: HashMap<String, String>,
}

impl PostalReference {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut places = HashMap::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result.with_context(|| format!("Malformed reference row {idx}"))?;
            let postal = record.get(POSTAL_CODE_COL).map(str::trim).unwrap_or("");
            let place = record
                .get(PLACE_NAME_COL)
                .and_then(|p| p.split(',').next())
                .map(str::trim)
                .unwrap_or("");
            if postal.is_empty() || place.is_empty() {
                continue;
            }
            places
                .entry(postal.to_string())
                .or_insert_with(|| place.to_uppercase());
        }

        Ok(Self { places })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open reference file {}", path.display()))?;
        Self::from_reader(file)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

impl PlaceLookup for PostalReference {
    fn lookup(&self, zip: &str) -> Option<String> {
        self.places.get(zip).cloned()
    }
}

/// Result of acquiring the reference.
#[derive(Debug)]
pub enum ReferenceOutcome {
    /// Downloaded and parsed from the remote archive.
    Fetched(PostalReference),
    /// Read from the local copy after the remote step failed or was skipped.
    CacheHit(PostalReference),
    /// Neither source worked, or lookups are disabled.
    Unavailable,
}

impl ReferenceOutcome {
    pub fn reference(&self) -> Option<&PostalReference> {
        match self {
            ReferenceOutcome::Fetched(r) | ReferenceOutcome::CacheHit(r) => Some(r),
            ReferenceOutcome::Unavailable => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReferenceOutcome::Fetched(_) => "fetched",
            ReferenceOutcome::CacheHit(_) => "cache_hit",
            ReferenceOutcome::Unavailable => "unavailable",
        }
    }
}

/// Source of country archives.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Returns the raw bytes of `{country}.zip`.
    async fn fetch_archive(&self, country: &str) -> Result<Vec<u8>>;
}

/// Fetches archives over HTTP from a GeoNames-style export directory.
pub struct HttpArchiveFetcher<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> HttpArchiveFetcher<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> ArchiveFetcher for HttpArchiveFetcher<C> {
    async fn fetch_archive(&self, country: &str) -> Result<Vec<u8>> {
        let url = archive_url(&self.base_url, country);
        info!(url = %url, "Downloading postal reference");

        fetch_bytes(&self.client, &url).await.map_err(|e| {
            let not_found = e
                .downcast_ref::<reqwest::Error>()
                .and_then(reqwest::Error::status)
                == Some(StatusCode::NOT_FOUND);
            if not_found {
                PipelineError::CountryNotFound(country.to_string()).into()
            } else {
                e
            }
        })
    }
}

pub fn archive_url(base_url: &str, country: &str) -> String {
    format!(
        "{}/{}.zip",
        base_url.trim_end_matches('/'),
        country.to_uppercase()
    )
}

/// Reads one entry out of an in-memory zip archive; `None` if absent.
pub fn extract_entry(archive: &[u8], name: &str) -> Result<Option<Vec<u8>>> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).context("Failed to read zip archive")?;
    let mut entry = match zip.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {name} from archive"))?;
    Ok(Some(buf))
}

async fn fetch_remote<F: ArchiveFetcher + ?Sized>(
    fetcher: &F,
    country: &str,
) -> Result<PostalReference> {
    let archive = fetcher.fetch_archive(country).await?;
    let entry = format!("{country}.txt");
    let text = extract_entry(&archive, &entry)?
        .with_context(|| format!("{entry} missing from archive"))?;
    PostalReference::from_reader(text.as_slice())
}

/// Acquires the postal reference following `config.strategy`.
///
/// Remote failures of any kind fall through to the cached file; a missing
/// or unreadable cache yields [`ReferenceOutcome::Unavailable`].
#[tracing::instrument(skip(fetcher, config), fields(strategy = ?config.strategy, country = %config.country))]
pub async fn acquire_reference<F: ArchiveFetcher + ?Sized>(
    fetcher: &F,
    config: &ReferenceConfig,
) -> ReferenceOutcome {
    let country = config.country.to_uppercase();

    match config.strategy {
        ReferenceStrategy::Off => return ReferenceOutcome::Unavailable,
        ReferenceStrategy::Cache => {}
        ReferenceStrategy::Remote => match fetch_remote(fetcher, &country).await {
            Ok(reference) => {
                info!(zip_codes = reference.len(), "Loaded postal reference from remote");
                return ReferenceOutcome::Fetched(reference);
            }
            Err(e) => {
                warn!(error = %e, "Remote postal reference failed; falling back to local copy")
            }
        },
    }

    let cache = config.cache_path();
    if !cache.exists() {
        warn!(path = %cache.display(), "Local postal reference not found");
        return ReferenceOutcome::Unavailable;
    }
    match PostalReference::from_path(&cache) {
        Ok(reference) => {
            info!(zip_codes = reference.len(), path = %cache.display(), "Loaded postal reference from local copy");
            ReferenceOutcome::CacheHit(reference)
        }
        Err(e) => {
            warn!(error = %e, "Local postal reference unreadable");
            ReferenceOutcome::Unavailable
        }
    }
}

/// Files written by [`download_reference`].
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub country: String,
    pub archive: PathBuf,
    pub data: PathBuf,
    pub readme: Option<PathBuf>,
    pub postal_codes: usize,
}

/// Downloads `{country}.zip` into `out_dir`, extracting `{country}.txt` and,
/// when present, `readme.txt` as `{country}_readme.txt`.
#[tracing::instrument(skip(fetcher, out_dir), fields(out_dir = %out_dir.display()))]
pub async fn download_reference<F: ArchiveFetcher + ?Sized>(
    fetcher: &F,
    country: &str,
    out_dir: &Path,
) -> Result<DownloadSummary> {
    let country = country.to_uppercase();
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let bytes = fetcher.fetch_archive(&country).await?;

    let archive = out_dir.join(format!("{country}.zip"));
    fs::write(&archive, &bytes).with_context(|| format!("Failed to write {}", archive.display()))?;
    info!(path = %archive.display(), bytes = bytes.len(), "Archive saved");

    let entry = format!("{country}.txt");
    let text = extract_entry(&bytes, &entry)?
        .with_context(|| format!("{entry} missing from archive"))?;
    let data = out_dir.join(&entry);
    fs::write(&data, &text).with_context(|| format!("Failed to write {}", data.display()))?;

    let readme = match extract_entry(&bytes, "readme.txt")? {
        Some(contents) => {
            let path = out_dir.join(format!("{country}_readme.txt"));
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Some(path)
        }
        None => None,
    };

    let postal_codes = count_rows(&text)?;
    info!(country = %country, postal_codes, path = %data.display(), "Postal reference extracted");

    Ok(DownloadSummary {
        country,
        archive,
        data,
        readme,
        postal_codes,
    })
}

fn count_rows(text: &[u8]) -> Result<usize> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(text);
    let mut rows = 0;
    for record in rdr.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}
