//! `zpool` / `zfs` Subprocess Plumbing
//!
//! Every invocation goes through `tokio::process`, so waiting on an external
//! command never blocks a runtime worker.

use crate::config::ZfsConfig;
use crate::error::{ExporterError, Result};
use crate::zfs::events::SnapshotLister;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

const SNAPSHOT_LIST_ARGS: [&str; 7] = [
    "list",
    "-H",
    "-p",
    "-t",
    "snapshot",
    "-o",
    "name,creation,used",
];

/// Runs the ZFS command line tools configured for this host
#[derive(Debug, Clone)]
pub struct ZfsCommands {
    zpool_path: String,
    zfs_path: String,
}

impl ZfsCommands {
    pub fn new(config: &ZfsConfig) -> Self {
        Self {
            zpool_path: config.zpool_path.clone(),
            zfs_path: config.zfs_path.clone(),
        }
    }

    /// `zpool status -pP`: parsable counters and full device paths
    pub async fn zpool_status(&self) -> Result<String> {
        execute(&self.zpool_path, &["status", "-pP"]).await
    }

    /// Every snapshot on every imported pool
    pub async fn list_all_snapshots(&self) -> Result<String> {
        execute(&self.zfs_path, &SNAPSHOT_LIST_ARGS).await
    }

    /// Starts `zpool events -vfH`, which follows the event log until killed
    ///
    /// The child is killed when the returned handle is dropped.
    pub fn spawn_event_feed(&self) -> Result<Child> {
        let args = ["events", "-vfH"];
        let command_line = render_command(&self.zpool_path, &args);
        debug!("Spawning `{}`", command_line);

        Command::new(&self.zpool_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExporterError::CommandStart {
                command: command_line,
                source,
            })
    }
}

impl SnapshotLister for ZfsCommands {
    /// Snapshots directly below `dataset`
    async fn list_snapshots(&self, dataset: &str) -> Result<String> {
        let mut args = SNAPSHOT_LIST_ARGS.to_vec();
        args.extend(["-d", "1", dataset]);
        execute(&self.zfs_path, &args).await
    }
}

fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs a command to completion and returns its stdout
///
/// # Errors
///
/// [`ExporterError::CommandStart`] if the program cannot be spawned,
/// [`ExporterError::CommandFailed`] with its stderr if it exits unsuccessfully.
async fn execute(program: &str, args: &[&str]) -> Result<String> {
    let command_line = render_command(program, args);
    debug!("Running `{}`", command_line);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExporterError::CommandStart {
            command: command_line.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ExporterError::CommandFailed {
            command: command_line,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout)
        .map_err(|e| ExporterError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
