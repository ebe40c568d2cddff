//! ZFS Data Sources
//!
//! Parsers and state for the three inputs the exporter reads:
//!
//! - [`status`] - `zpool status` topology and health
//! - [`snapshot`] - `zfs list -t snapshot` listings and the snapshot inventory
//! - [`events`] - the live `zpool events` feed
//!
//! [`command`] runs the tools that produce them.

pub mod command;
pub mod events;
pub mod snapshot;
pub mod status;

pub use command::ZfsCommands;
pub use events::{EventConsumer, EventDecoder, SnapshotLister, ZfsEvent};
pub use snapshot::{SnapshotFilter, SnapshotRecord, SnapshotStore};
pub use status::{parse_status, HealthState, StatusReport};
