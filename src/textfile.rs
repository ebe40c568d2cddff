//! Text-File Output
//!
//! Periodically renders the metrics into a file for node_exporter's textfile
//! collector. A render is only written when its SHA-256 differs from the last
//! written one, and always through `<path>.tmp` plus a rename so readers never see
//! a partial file.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Writes rendered metrics to one file, skipping unchanged content
#[derive(Debug)]
pub struct TextFileWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    last_digest: Option<Vec<u8>>,
}

impl TextFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp_path),
            last_digest: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `content` unless it matches the last written content
    ///
    /// Returns whether the file was written. The digest is only remembered once the
    /// rename succeeded, so a failed write is retried with the next render.
    pub async fn update(&mut self, content: &str) -> Result<bool> {
        let digest = Sha256::digest(content.as_bytes()).to_vec();
        if self.last_digest.as_ref() == Some(&digest) {
            debug!("No change in metrics, skipping {}", self.path.display());
            return Ok(false);
        }

        tokio::fs::write(&self.tmp_path, content).await?;
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        self.last_digest = Some(digest);

        info!("Wrote text file: {}", self.path.display());
        Ok(true)
    }
}

/// Renders and writes every `interval` until `cancel` fires
///
/// The first tick fires one `interval` after the call; write the initial render
/// before starting the loop. Failures are logged and retried on the next tick.
pub async fn run<F, Fut>(
    mut writer: TextFileWriter,
    interval: Duration,
    mut render: F,
    cancel: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Text file output stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let written = match render().await {
            Ok(content) => writer.update(&content).await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!("Error writing text file {}: {:#}", writer.path().display(), e);
        }
    }
}
