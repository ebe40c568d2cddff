//! Snapshot Inventory
//!
//! Holds, per dataset, the snapshots currently known to exist, ordered by creation
//! time. The store is fed twice:
//!
//! - a full `zfs list -t snapshot` listing at startup (and a per-dataset listing
//!   after every snapshot creation event), merged through [`SnapshotStore::full_sync`]
//! - destroy events, applied directly through [`SnapshotStore::remove`]
//!
//! All mutation and aggregation go through one mutex; scrapes only ever see the
//! state after a completed operation.

use crate::error::{ExporterError, LineError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A snapshot as listed by `zfs list -Hp -o name,creation,used`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub name: String,
    /// Creation time, seconds since the epoch
    pub created: i64,
    pub used_bytes: u64,
}

impl SnapshotRecord {
    pub fn new(name: impl Into<String>, created: i64, used_bytes: u64) -> Self {
        Self {
            name: name.into(),
            created,
            used_bytes,
        }
    }
}

/// Per-dataset aggregate exposed as metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub dataset: String,
    pub count: usize,
    pub used_bytes: u64,
    /// Newest creation time, `None` for a dataset whose snapshots were all removed
    pub last_created: Option<i64>,
}

/// Splits `dataset@snapshot` at the last `@`
pub fn split_snapshot_name(full_name: &str) -> Option<(&str, &str)> {
    full_name.rsplit_once('@')
}

/// Parses `zfs list -H -p -t snapshot -o name,creation,used` output
///
/// Blank lines are skipped.
///
/// # Errors
///
/// Returns [`ExporterError::Parse`] naming every malformed line if any line does not
/// have exactly three fields, lacks an `@`, or carries a non-numeric creation time
/// or size.
pub fn parse_listing(listing: &str) -> Result<Vec<(String, SnapshotRecord)>> {
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for (index, line) in listing.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_listing_line(line) {
            Ok(record) => records.push(record),
            Err(causes) => failures.push(LineError::new(index + 1, line, causes)),
        }
    }

    if !failures.is_empty() {
        return Err(ExporterError::Parse {
            input: "zfs list",
            lines: failures,
        });
    }
    Ok(records)
}

fn parse_listing_line(line: &str) -> std::result::Result<(String, SnapshotRecord), Vec<String>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [full_name, created, used] = fields.as_slice() else {
        return Err(vec![format!("expected 3 fields, found {}", fields.len())]);
    };

    let mut causes = Vec::new();
    let split = split_snapshot_name(full_name);
    if split.is_none() {
        causes.push(format!("invalid snapshot name {full_name:?}"));
    }
    let created = created
        .parse::<i64>()
        .map_err(|e| causes.push(format!("invalid creation time {created:?}: {e}")))
        .ok();
    let used = used
        .parse::<u64>()
        .map_err(|e| causes.push(format!("invalid used bytes {used:?}: {e}")))
        .ok();

    match (split, created, used) {
        (Some((dataset, name)), Some(created), Some(used)) => {
            Ok((dataset.to_string(), SnapshotRecord::new(name, created, used)))
        }
        _ => Err(causes),
    }
}

/// Decides which snapshots enter the store, from exclusion patterns
///
/// A snapshot is kept unless a pattern matches `dataset@snapshot`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    excludes: Vec<Regex>,
}

impl SnapshotFilter {
    /// # Errors
    ///
    /// Returns [`ExporterError::Config`] for the first pattern that is not a valid
    /// regular expression.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let excludes = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|e| {
                    ExporterError::Config(format!(
                        "invalid snapshot exclude pattern {:?}: {}",
                        pattern.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { excludes })
    }

    pub fn keep(&self, dataset: &str, snapshot: &str) -> bool {
        if self.excludes.is_empty() {
            return true;
        }
        let full_name = format!("{dataset}@{snapshot}");
        !self.excludes.iter().any(|r| r.is_match(&full_name))
    }
}

type KeepFn = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Thread-safe per-dataset snapshot inventory
pub struct SnapshotStore {
    datasets: Mutex<BTreeMap<String, Vec<SnapshotRecord>>>,
    keep: KeepFn,
}

impl SnapshotStore {
    /// Creates an empty store that admits only records for which `keep` holds
    pub fn new(keep: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            datasets: Mutex::new(BTreeMap::new()),
            keep: Box::new(keep),
        }
    }

    /// Creates an empty store using the exclusion patterns of `filter`
    pub fn with_filter(filter: SnapshotFilter) -> Self {
        Self::new(move |dataset, snapshot| filter.keep(dataset, snapshot))
    }

    // every operation leaves each list sorted and duplicate-free before it can
    // panic, so a poisoned lock still guards a valid map
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<SnapshotRecord>>> {
        self.datasets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges a freshly parsed listing into the store
    ///
    /// Each record goes through the same per-name insertion as [`Self::insert`], so
    /// records already present are left untouched and nothing is removed. Returns the
    /// number of records that were actually added.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Parse`] if any line is malformed; the store is not
    /// modified in that case.
    pub fn full_sync(&self, listing: &str) -> Result<usize> {
        let records = parse_listing(listing)?;

        let mut datasets = self.lock();
        let added = records
            .into_iter()
            .filter(|(dataset, record)| self.admit(&mut datasets, dataset, record.clone()))
            .count();
        debug!("Merged snapshot listing, {} new records", added);
        Ok(added)
    }

    /// Inserts a record, keeping the dataset's list ordered by creation time
    ///
    /// Returns `false` if the record was filtered out or a snapshot of the same name
    /// already exists in the dataset.
    pub fn insert(&self, dataset: &str, record: SnapshotRecord) -> bool {
        let mut datasets = self.lock();
        self.admit(&mut datasets, dataset, record)
    }

    fn admit(
        &self,
        datasets: &mut BTreeMap<String, Vec<SnapshotRecord>>,
        dataset: &str,
        record: SnapshotRecord,
    ) -> bool {
        if !(self.keep)(dataset, &record.name) {
            return false;
        }
        let records = datasets.entry(dataset.to_string()).or_default();
        insert_sorted(records, record)
    }

    /// Removes every record of `dataset` named `name`
    ///
    /// The dataset stays known (possibly with an empty list). Unknown datasets or
    /// names are ignored. Returns the number of removed records.
    pub fn remove(&self, dataset: &str, name: &str) -> usize {
        let mut datasets = self.lock();
        let Some(records) = datasets.get_mut(dataset) else {
            return 0;
        };
        let before = records.len();
        records.retain(|record| record.name != name);
        before - records.len()
    }

    /// Snapshot count, total used bytes and newest creation time per dataset
    pub fn aggregate(&self) -> Vec<DatasetSummary> {
        let datasets = self.lock();
        datasets
            .iter()
            .map(|(dataset, records)| DatasetSummary {
                dataset: dataset.clone(),
                count: records.len(),
                used_bytes: records.iter().map(|r| r.used_bytes).sum(),
                last_created: records.iter().map(|r| r.created).max(),
            })
            .collect()
    }

    /// Copy of one dataset's records, in stored order
    pub fn records(&self, dataset: &str) -> Option<Vec<SnapshotRecord>> {
        self.lock().get(dataset).cloned()
    }

    /// Names of every dataset seen so far
    pub fn datasets(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

/// Splices `record` in front of the first record created after it
///
/// Records with equal creation times keep their arrival order. Returns `false`
/// without modifying `records` if the name is already present.
fn insert_sorted(records: &mut Vec<SnapshotRecord>, record: SnapshotRecord) -> bool {
    if records.iter().any(|existing| existing.name == record.name) {
        return false;
    }
    let position = records
        .iter()
        .position(|existing| existing.created > record.created)
        .unwrap_or(records.len());
    records.insert(position, record);
    true
}
