//! ZFS Event Exporter
//!
//! A Prometheus metrics exporter for ZFS pool health and snapshot retention.
//!
//! # Overview
//!
//! Pool topology and health are read fresh from `zpool status` on every scrape.
//! The snapshot inventory is loaded once from `zfs list` and then kept current by
//! following the `zpool events` feed, so scrapes never have to list every snapshot
//! of every dataset.
//!
//! # Architecture
//!
//! ```text
//!  zpool status -pP ──────────────────────────────┐
//!                                                  ▼
//!  zfs list ──► ┌───────────────┐          ┌──────────────┐      HTTP      ┌────────────┐
//!               │ SnapshotStore │ ───────► │  Collectors  │ ◄────────────► │ Prometheus │
//!  zpool   ──►  └───────────────┘          └──────────────┘   /metrics     └────────────┘
//!  events  decoder ─► queue ─► consumer           │
//!                                                  ▼
//!                                           text file (optional)
//! ```
//!
//! # Modules
//!
//! - [`zfs`] - parsers, snapshot inventory, event decoder and command runners
//! - [`collectors`] - projection of parsed state onto metrics
//! - [`metrics`] - Prometheus metric definitions
//! - [`server`] - HTTP server and background tasks
//! - [`textfile`] - periodic text-file output
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//!
//! # Quick Start
//!
//! ```no_run
//! use zfs_event_exporter::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/Default.toml")?;
//!     server::start(config).await?;
//!     Ok(())
//! }
//! ```

pub mod collectors;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod textfile;
pub mod zfs;
