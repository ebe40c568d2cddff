//! Prometheus Metrics Definitions
//!
//! This module defines all Prometheus metrics exposed by the exporter. One
//! [`MetricsCollector`] is built by the entry point and handed to every component;
//! there is no process-global registry.
//!
//! # Metric Categories
//!
//! ## Pool Topology
//! - `zfs_pool_status` - one-hot health state of pools and vdev containers
//!   - Labels: pool, state
//! - `zfs_pool_errors_total` - read/write/checksum errors of pools and vdev containers
//!   - Labels: pool, type
//! - `zfs_pool_disk_status` - one-hot health state of leaf devices
//!   - Labels: disk, pool, state
//! - `zfs_pool_disk_errors_total` - read/write/checksum errors of leaf devices
//!   - Labels: disk, pool, type
//!
//! ## Snapshots
//! - `zfs_snapshot_count`, `zfs_snapshot_disk_used`, `zfs_snapshot_last_unixtime`
//!   - Labels: dataset
//!
//! ## Event Stream
//! - `zfs_event_stream_up` - 1 while the live event feed is being consumed
//! - `zfs_events_total` - decoded events
//!   - Labels: action
//!
//! # Metric Types
//!
//! - **GaugeVec**: reset and refilled on every scrape (health, snapshot aggregates)
//! - **CounterVec**: only ever incremented; the error counters are fed the
//!   cumulative totals of each report, so they grow with every scrape
//!
//! All metrics use the `zfs_` namespace prefix.

use crate::zfs::status::{ErrorCounts, HealthState};
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const NAMESPACE: &str = "zfs";

/// Metrics collector for ZFS pools, snapshots and the event stream
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    // serialises reset/set/gather across concurrent scrapes
    scrape_lock: Arc<Mutex<()>>,

    // Pool metrics
    pub pool_status: Arc<GaugeVec>,
    pub pool_errors_total: Arc<CounterVec>,
    pub pool_disk_status: Arc<GaugeVec>,
    pub pool_disk_errors_total: Arc<CounterVec>,

    // Snapshot metrics
    pub snapshot_count: Arc<GaugeVec>,
    pub snapshot_disk_used: Arc<GaugeVec>,
    pub snapshot_last_unixtime: Arc<GaugeVec>,

    // Event stream metrics
    pub event_stream_up: Arc<Gauge>,
    pub events_total: Arc<CounterVec>,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Pool metrics
        let pool_status = GaugeVec::new(
            Opts::new("pool_status", "Status of the pool (1 for the current state)")
                .namespace(NAMESPACE),
            &["pool", "state"],
        )?;

        let pool_errors_total = CounterVec::new(
            Opts::new(
                "pool_errors_total",
                "Accumulated read/write/checksum errors reported for the pool",
            )
            .namespace(NAMESPACE),
            &["pool", "type"],
        )?;

        let pool_disk_status = GaugeVec::new(
            Opts::new(
                "pool_disk_status",
                "Status of a pool device (1 for the current state)",
            )
            .namespace(NAMESPACE),
            &["disk", "pool", "state"],
        )?;

        let pool_disk_errors_total = CounterVec::new(
            Opts::new(
                "pool_disk_errors_total",
                "Accumulated read/write/checksum errors reported for a pool device",
            )
            .namespace(NAMESPACE),
            &["disk", "pool", "type"],
        )?;

        // Snapshot metrics
        let snapshot_count = GaugeVec::new(
            Opts::new("snapshot_count", "Count of existing ZFS snapshots").namespace(NAMESPACE),
            &["dataset"],
        )?;

        let snapshot_disk_used = GaugeVec::new(
            Opts::new(
                "snapshot_disk_used",
                "Disk space used by all snapshots of the dataset, in bytes",
            )
            .namespace(NAMESPACE),
            &["dataset"],
        )?;

        let snapshot_last_unixtime = GaugeVec::new(
            Opts::new(
                "snapshot_last_unixtime",
                "Creation time of the newest snapshot of the dataset",
            )
            .namespace(NAMESPACE),
            &["dataset"],
        )?;

        // Event stream metrics
        let event_stream_up = Gauge::with_opts(
            Opts::new(
                "event_stream_up",
                "Whether the zpool event feed is being consumed (1=up, 0=down)",
            )
            .namespace(NAMESPACE),
        )?;

        let events_total = CounterVec::new(
            Opts::new("events_total", "Decoded zpool events by action").namespace(NAMESPACE),
            &["action"],
        )?;

        registry.register(Box::new(pool_status.clone()))?;
        registry.register(Box::new(pool_errors_total.clone()))?;
        registry.register(Box::new(pool_disk_status.clone()))?;
        registry.register(Box::new(pool_disk_errors_total.clone()))?;
        registry.register(Box::new(snapshot_count.clone()))?;
        registry.register(Box::new(snapshot_disk_used.clone()))?;
        registry.register(Box::new(snapshot_last_unixtime.clone()))?;
        registry.register(Box::new(event_stream_up.clone()))?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            scrape_lock: Arc::new(Mutex::new(())),
            pool_status: Arc::new(pool_status),
            pool_errors_total: Arc::new(pool_errors_total),
            pool_disk_status: Arc::new(pool_disk_status),
            pool_disk_errors_total: Arc::new(pool_disk_errors_total),
            snapshot_count: Arc::new(snapshot_count),
            snapshot_disk_used: Arc::new(snapshot_disk_used),
            snapshot_last_unixtime: Arc::new(snapshot_last_unixtime),
            event_stream_up: Arc::new(event_stream_up),
            events_total: Arc::new(events_total),
        })
    }

    /// Holds off other scrapes until the guard is dropped
    pub fn lock_scrape(&self) -> MutexGuard<'_, ()> {
        self.scrape_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Clears every per-scrape gauge so vanished pools, devices and datasets drop out
    ///
    /// Error counters and event stream metrics are left alone.
    pub fn reset(&self) {
        self.pool_status.reset();
        self.pool_disk_status.reset();
        self.snapshot_count.reset();
        self.snapshot_disk_used.reset();
        self.snapshot_last_unixtime.reset();
    }

    /// Sets all six state series for `labels`, 1 for `health` and 0 for the rest
    ///
    /// `labels` are the identifying label values without the trailing `state`.
    pub fn set_health(&self, gauge: &GaugeVec, labels: &[&str], health: Option<HealthState>) {
        for state in HealthState::ALL {
            let mut values = labels.to_vec();
            values.push(state.as_label());
            let value = if health == Some(state) { 1.0 } else { 0.0 };
            gauge.with_label_values(&values).set(value);
        }
    }

    /// Adds a row's read/write/checksum totals to `counter`
    pub fn add_errors(&self, counter: &CounterVec, labels: &[&str], errors: ErrorCounts) {
        for (kind, count) in [
            ("read", errors.read),
            ("write", errors.write),
            ("checksum", errors.checksum),
        ] {
            let mut values = labels.to_vec();
            values.push(kind);
            counter.with_label_values(&values).inc_by(count as f64);
        }
    }

    pub fn set_event_stream_up(&self, up: bool) {
        self.event_stream_up.set(if up { 1.0 } else { 0.0 });
    }

    pub fn is_event_stream_up(&self) -> bool {
        self.event_stream_up.get() >= 1.0
    }
}
