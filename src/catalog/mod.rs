//! Remote laundry catalog.
//!
//! The laundry backend owns every garment's wash counter. A detection session
//! reads the counters once when it starts (`WearCache`), and after a window
//! closes it pushes `cached + 1` for each confirmed garment and logs the worn
//! set for the day.
//!
//! `CatalogApi` is the raw, fallible transport. `RemoteCatalog` layers the
//! failure policy on top:
//! - catalog fetch failure degrades to an empty cache (every garment counts from 0)
//! - each wear push is independent; a failed push is logged and skipped
//! - the worn-items log is one call per window close, best effort
//!
//! None of these failures abort a session or surface to the trigger caller.

mod http;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use http::{HttpCatalogApi, HttpCatalogConfig};

/// One garment as the backend's `clothingcatalog` table reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClothingCatalogEntry {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(
        rename = "WearsBeforeWash",
        alias = "wearsBeforeWash",
        default,
        deserialize_with = "null_as_zero"
    )]
    pub wears_before_wash: u32,
    /// Wears allowed before the backend moves the garment to the laundry list.
    #[serde(rename = "ConfiguredWears", alias = "configuredWears", default)]
    pub configured_wears: Option<u32>,
    #[serde(rename = "Type", alias = "type", default)]
    pub garment_type: Option<String>,
}

impl ClothingCatalogEntry {
    pub fn new(name: impl Into<String>, wears_before_wash: u32) -> Self {
        Self {
            name: name.into(),
            wears_before_wash,
            configured_wears: None,
            garment_type: None,
        }
    }

    pub fn with_configured_wears(mut self, configured_wears: u32) -> Self {
        self.configured_wears = Some(configured_wears);
        self
    }

    /// True when `wears` reaches the configured limit. Garments without a limit
    /// are never due.
    pub fn due_for_wash(&self, wears: u32) -> bool {
        self.configured_wears
            .map(|limit| limit > 0 && wears >= limit)
            .unwrap_or(false)
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw access to the laundry backend.
pub trait CatalogApi: Send + Sync {
    /// `GET /clothingcatalog`.
    fn fetch_catalog(&self) -> Result<Vec<ClothingCatalogEntry>>;

    /// `PUT /{name}` with the new wash counter.
    fn push_wear(&self, name: &str, wears_before_wash: u32) -> Result<()>;

    /// `POST /` with the garments worn on `date`.
    fn log_worn_items(&self, date: NaiveDate, items: &[String]) -> Result<()>;

    /// `GET /laundrylist`, returned verbatim.
    fn laundry_list(&self) -> Result<serde_json::Value>;
}

/// Session-local snapshot of the backend's wash counters, keyed by garment name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WearCache {
    entries: BTreeMap<String, ClothingCatalogEntry>,
}

impl WearCache {
    pub fn from_entries(entries: impl IntoIterator<Item = ClothingCatalogEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            if let Some(previous) = map.insert(entry.name.clone(), entry) {
                log::warn!(
                    "catalog lists '{}' more than once; keeping the later entry",
                    previous.name
                );
            }
        }
        Self { entries: map }
    }

    pub fn wears(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|entry| entry.wears_before_wash)
    }

    /// The counter value to push after one more wear. Unknown garments start at 0.
    pub fn next_wear_count(&self, name: &str) -> u32 {
        self.wears(name).unwrap_or(0).saturating_add(1)
    }

    /// Record a counter the backend accepted.
    pub fn record_wear(&mut self, name: &str, wears_before_wash: u32) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| ClothingCatalogEntry::new(name, 0))
            .wears_before_wash = wears_before_wash;
    }

    pub fn entry(&self, name: &str) -> Option<&ClothingCatalogEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a window-close reconciliation did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Garments whose counter push succeeded, with the value pushed.
    pub pushed: Vec<(String, u32)>,
    /// Garments whose counter push failed.
    pub failed_pushes: Vec<String>,
    /// Whether the worn-items log call succeeded.
    pub logged: bool,
    /// Garments that reached their configured wear limit with this push.
    pub due_for_wash: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed_pushes.is_empty() && self.logged
    }
}

/// Failure policy over a `CatalogApi`.
#[derive(Clone)]
pub struct RemoteCatalog {
    api: Arc<dyn CatalogApi>,
}

impl RemoteCatalog {
    pub fn new(api: Arc<dyn CatalogApi>) -> Self {
        Self { api }
    }

    /// Fetch the wash counters. Any failure yields an empty cache.
    pub fn fetch_cache(&self) -> WearCache {
        match self.api.fetch_catalog() {
            Ok(entries) => {
                log::info!("catalog fetched: {} garments", entries.len());
                WearCache::from_entries(entries)
            }
            Err(err) => {
                log::warn!(
                    "catalog fetch failed, wash counts default to 0 this session: {:#}",
                    err
                );
                WearCache::default()
            }
        }
    }

    /// Push one wear for every confirmed garment, then log the worn set once.
    ///
    /// An empty set makes no calls.
    pub fn reconcile(
        &self,
        cache: &mut WearCache,
        confirmed: &BTreeSet<String>,
        date: NaiveDate,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if confirmed.is_empty() {
            return report;
        }

        for name in confirmed {
            let next = cache.next_wear_count(name);
            match self.api.push_wear(name, next) {
                Ok(()) => {
                    log::info!("wear recorded: {} -> {}", name, next);
                    let due = cache
                        .entry(name)
                        .map(|entry| entry.due_for_wash(next))
                        .unwrap_or(false);
                    cache.record_wear(name, next);
                    if due {
                        log::info!("{} reached its wear limit and is due for a wash", name);
                        report.due_for_wash.push(name.clone());
                    }
                    report.pushed.push((name.clone(), next));
                }
                Err(err) => {
                    log::warn!("wear push for {} failed: {:#}", name, err);
                    report.failed_pushes.push(name.clone());
                }
            }
        }

        let items: Vec<String> = confirmed.iter().cloned().collect();
        match self.api.log_worn_items(date, &items) {
            Ok(()) => {
                log::info!("worn items logged for {}: {:?}", date, items);
                report.logged = true;
            }
            Err(err) => log::warn!("worn items log for {} failed: {:#}", date, err),
        }
        report
    }

    pub fn laundry_list(&self) -> Result<serde_json::Value> {
        self.api.laundry_list()
    }
}

/// Catalog wrapper that reads through to the backend but never writes.
///
/// Used for dry runs: pushes and worn-item logs are reported in the log only.
pub struct DryRunCatalog {
    inner: Option<Arc<dyn CatalogApi>>,
}

impl DryRunCatalog {
    pub fn new(inner: Option<Arc<dyn CatalogApi>>) -> Self {
        Self { inner }
    }
}

impl CatalogApi for DryRunCatalog {
    fn fetch_catalog(&self) -> Result<Vec<ClothingCatalogEntry>> {
        match &self.inner {
            Some(inner) => inner.fetch_catalog(),
            None => Ok(Vec::new()),
        }
    }

    fn push_wear(&self, name: &str, wears_before_wash: u32) -> Result<()> {
        log::info!("dry run: would set {} wears to {}", name, wears_before_wash);
        Ok(())
    }

    fn log_worn_items(&self, date: NaiveDate, items: &[String]) -> Result<()> {
        log::info!("dry run: would log {:?} as worn on {}", items, date);
        Ok(())
    }

    fn laundry_list(&self) -> Result<serde_json::Value> {
        match &self.inner {
            Some(inner) => inner.laundry_list(),
            None => Ok(serde_json::Value::Array(Vec::new())),
        }
    }
}
