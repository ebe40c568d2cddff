//! Pool Metrics Collector
//!
//! Projects a parsed `zpool status` report onto the pool and disk series.
//!
//! # Metrics Produced
//! - `zfs_pool_status` - Status of the pool (one-hot over the six health states)
//!   - Labels: pool, state
//! - `zfs_pool_errors_total` - Accumulated read/write/checksum errors
//!   - Labels: pool, type
//! - `zfs_pool_disk_status` - Status of a pool device (one-hot)
//!   - Labels: disk, pool, state
//! - `zfs_pool_disk_errors_total` - Accumulated read/write/checksum errors of a device
//!   - Labels: disk, pool, type
//!
//! Only rows that carry the STATE and counter columns are exported; pure grouping
//! rows such as `cache` or `logs` are skipped. Pools and vdev containers share the
//! pool series, labelled with their full trace (`rpool/raidz1-0`).

use crate::metrics::MetricsCollector;
use crate::zfs::status::{NodeKind, StatusReport};
use tracing::debug;

/// Updates pool and disk metrics from `report`
///
/// The status gauges must have been reset by the caller. Returns the number of
/// exported rows.
pub fn collect_pool_metrics(metrics: &MetricsCollector, report: &StatusReport) -> usize {
    let mut exported = 0;

    for node in report.nodes() {
        let Some(errors) = node.errors else {
            continue;
        };
        let pool = node.pool_label();

        match node.kind {
            NodeKind::Disk => {
                let labels = [node.name(), pool.as_str()];
                metrics.set_health(&metrics.pool_disk_status, &labels, node.health);
                metrics.add_errors(&metrics.pool_disk_errors_total, &labels, errors);
            }
            NodeKind::Pool | NodeKind::Vdev => {
                let labels = [pool.as_str()];
                metrics.set_health(&metrics.pool_status, &labels, node.health);
                metrics.add_errors(&metrics.pool_errors_total, &labels, errors);
            }
        }
        exported += 1;
    }

    debug!("Updated pool metrics for {} devices", exported);
    exported
}
