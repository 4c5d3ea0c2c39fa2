//! Missing-city imputation.
//!
//! Stage one votes a city per ZIP from rows that already have one; stage two
//! asks a [`PlaceLookup`] for whatever is still missing.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::clean::PledgeRecord;

/// Literal written for cities that stay unresolved under
/// [`CityPolicy::LegacySentinel`].
pub const MISSING_CITY_SENTINEL: &str = "NAN";

/// External ZIP → place-name source used once the internal vote is exhausted.
pub trait PlaceLookup {
    fn lookup(&self, zip: &str) -> Option<String>;
}

impl PlaceLookup for HashMap<String, String> {
    fn lookup(&self, zip: &str) -> Option<String> {
        self.get(zip).cloned()
    }
}

/// How unresolved cities appear in the final dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CityPolicy {
    /// Unresolved cities become the text `NAN`.
    #[default]
    LegacySentinel,
    /// Unresolved cities stay empty.
    Absent,
}

/// `true` when `city` is absent, blank, or the text `nan` in any case.
pub fn is_missing_city(city: Option<&str>) -> bool {
    match city.map(str::trim) {
        None => true,
        Some(c) => c.is_empty() || c.eq_ignore_ascii_case(MISSING_CITY_SENTINEL),
    }
}

/// Counts records whose city is still missing.
pub fn count_missing(records: &[PledgeRecord]) -> usize {
    records
        .iter()
        .filter(|r| is_missing_city(r.city.as_deref()))
        .count()
}

/// Builds the ZIP → city map from records that already carry a usable city.
///
/// Cities are trimmed and uppercased before counting. The most frequent city
/// wins; equal counts go to the lexicographically smallest name.
pub fn build_zip_city_map(records: &[PledgeRecord]) -> HashMap<String, String> {
    let mut counts: HashMap<&str, BTreeMap<String, usize>> = HashMap::new();

    for record in records {
        let (Some(zip), Some(city)) = (record.zip_code.as_deref(), record.city.as_deref()) else {
            continue;
        };
        if is_missing_city(Some(city)) {
            continue;
        }
        *counts
            .entry(zip)
            .or_default()
            .entry(city.trim().to_uppercase())
            .or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(zip, cities)| {
            // BTreeMap iterates in name order, so the first maximum is the smallest name
            let mut best: Option<(&String, usize)> = None;
            for (city, n) in &cities {
                if best.is_none_or(|(_, top)| *n > top) {
                    best = Some((city, *n));
                }
            }
            best.map(|(city, _)| (zip.to_string(), city.clone()))
        })
        .collect()
}

/// Fills missing cities through `lookup`, returning how many were filled.
///
/// ZIPs are left-padded to five digits before the lookup.
pub fn fill_missing<L: PlaceLookup + ?Sized>(records: &mut [PledgeRecord], lookup: &L) -> usize {
    let mut filled = 0;
    for record in records.iter_mut() {
        if !is_missing_city(record.city.as_deref()) {
            continue;
        }
        let Some(zip) = record.zip_code.as_deref() else {
            continue;
        };
        if let Some(city) = lookup.lookup(&format!("{zip:0>5}")) {
            record.city = Some(city);
            filled += 1;
        }
    }
    filled
}

/// Counts of missing cities at each resolution stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolutionCounts {
    pub missing_before: usize,
    pub internal_map_size: usize,
    pub missing_after_internal: usize,
    pub missing_after_reference: usize,
}

/// Resolves missing cities in place and normalizes every city value.
///
/// `external` is consulted only for rows the internal vote could not fill;
/// `None` means stage two is skipped.
pub fn resolve_cities(
    records: &mut [PledgeRecord],
    external: Option<&dyn PlaceLookup>,
    policy: CityPolicy,
) -> ResolutionCounts {
    let missing_before = count_missing(records);
    info!(missing = missing_before, "Rows with missing City before fill");

    let internal = build_zip_city_map(records);
    info!(size = internal.len(), "ZIP to City mapping size (from existing data)");
    fill_missing(records, &internal);

    let missing_after_internal = count_missing(records);
    info!(
        missing = missing_after_internal,
        "Rows with missing City after internal mapping"
    );

    if missing_after_internal > 0 {
        match external {
            Some(lookup) => {
                let filled = fill_missing(records, lookup);
                debug!(filled, "Cities filled from postal reference");
            }
            None => info!("No postal reference available; skipping city lookup"),
        }
    }

    let missing_after_reference = count_missing(records);
    info!(
        missing = missing_after_reference,
        "Rows with missing City after reference lookup"
    );

    finalize_cities(records, policy);

    ResolutionCounts {
        missing_before,
        internal_map_size: internal.len(),
        missing_after_internal,
        missing_after_reference,
    }
}

/// Trims and uppercases every city; unresolved ones follow `policy`.
pub fn finalize_cities(records: &mut [PledgeRecord], policy: CityPolicy) {
    for record in records.iter_mut() {
        record.city = if is_missing_city(record.city.as_deref()) {
            match policy {
                CityPolicy::LegacySentinel => Some(MISSING_CITY_SENTINEL.to_string()),
                CityPolicy::Absent => None,
            }
        } else {
            record.city.as_deref().map(|c| c.trim().to_uppercase())
        };
    }
}
