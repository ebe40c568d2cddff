//! Snapshot Metrics Collector
//!
//! Exports the per-dataset aggregates of the snapshot inventory.
//!
//! # Metrics Produced
//! - `zfs_snapshot_count` - Count of existing ZFS snapshots
//!   - Labels: dataset
//! - `zfs_snapshot_disk_used` - Bytes used by the dataset's snapshots
//!   - Labels: dataset
//! - `zfs_snapshot_last_unixtime` - Creation time of the newest snapshot (0 if none)
//!   - Labels: dataset

use crate::metrics::MetricsCollector;
use crate::zfs::snapshot::SnapshotStore;
use tracing::debug;

/// Updates snapshot metrics from the store; returns the number of datasets
pub fn collect_snapshot_metrics(metrics: &MetricsCollector, store: &SnapshotStore) -> usize {
    let summaries = store.aggregate();

    for summary in &summaries {
        let labels = [summary.dataset.as_str()];
        metrics
            .snapshot_count
            .with_label_values(&labels)
            .set(summary.count as f64);
        metrics
            .snapshot_disk_used
            .with_label_values(&labels)
            .set(summary.used_bytes as f64);
        metrics
            .snapshot_last_unixtime
            .with_label_values(&labels)
            .set(summary.last_created.unwrap_or(0) as f64);
    }

    debug!("Updated snapshot metrics for {} datasets", summaries.len());
    summaries.len()
}
