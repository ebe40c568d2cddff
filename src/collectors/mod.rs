//! Metrics Collectors
//!
//! Turns the current state of the host into exported series, once per scrape.
//!
//! # Architecture
//!
//! A scrape follows the same steps every time:
//! - Run `zpool status` and parse it fresh (no topology is kept between scrapes)
//! - Take the scrape lock, reset the per-scrape gauges
//! - Let each collector update its series from the parsed report or the store
//! - Render the registry while still holding the lock
//!
//! # Error Handling
//!
//! A failing or unparsable `zpool status` fails the whole scrape: no half-updated
//! registry is ever rendered. The snapshot side cannot fail, it only reads the store.

use crate::metrics::MetricsCollector;
use crate::zfs::command::ZfsCommands;
use crate::zfs::snapshot::SnapshotStore;
use crate::zfs::status::{parse_status, StatusReport};
use anyhow::Context;
use tracing::debug;

/// Sources and metrics one scrape reads from and writes to
#[derive(Clone, Copy)]
pub struct CollectionContext<'a> {
    /// Runs `zpool status`
    pub zfs: &'a ZfsCommands,
    /// Metrics collector for updating Prometheus metrics
    pub metrics: &'a MetricsCollector,
    /// Snapshot inventory kept current by the event stream
    pub store: &'a SnapshotStore,
}

impl CollectionContext<'_> {
    /// Runs one full scrape and renders the registry
    pub async fn scrape(&self) -> anyhow::Result<String> {
        let status = self
            .zfs
            .zpool_status()
            .await
            .context("Failed to query pool status")?;
        let report = parse_status(&status).context("Failed to parse pool status")?;
        materialize(self.metrics, &report, self.store)
    }
}

/// Refreshes every series from `report` and `store` and renders the result
///
/// Runs under the scrape lock, so concurrent scrapes never see each other's resets.
pub fn materialize(
    metrics: &MetricsCollector,
    report: &StatusReport,
    store: &SnapshotStore,
) -> anyhow::Result<String> {
    let _guard = metrics.lock_scrape();
    metrics.reset();

    let devices = collect_pool_metrics(metrics, report);
    let datasets = collect_snapshot_metrics(metrics, store);
    debug!(
        "Scrape covered {} devices and {} datasets",
        devices, datasets
    );

    metrics.render()
}

// Collector modules
pub mod pool;
pub mod snapshot;

// Re-export collector functions for convenient access
pub use pool::collect_pool_metrics;
pub use snapshot::collect_snapshot_metrics;
