use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub zfs: ZfsConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub textfile: TextFileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZfsConfig {
    #[serde(default = "default_zpool_path")]
    pub zpool_path: String,
    #[serde(default = "default_zfs_path")]
    pub zfs_path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SnapshotConfig {
    /// Regular expressions matched against `dataset@snapshot`; matches are not tracked
    #[serde(default)]
    pub exclude_names: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TextFileConfig {
    /// Output file; no file is written when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_textfile_interval")]
    pub interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
        }
    }
}

impl Default for ZfsConfig {
    fn default() -> Self {
        Self {
            zpool_path: default_zpool_path(),
            zfs_path: default_zfs_path(),
        }
    }
}

impl Default for TextFileConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_seconds: default_textfile_interval(),
        }
    }
}

fn default_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9128
}

fn default_zpool_path() -> String {
    "zpool".to_string()
}

fn default_zfs_path() -> String {
    "zfs".to_string()
}

fn default_textfile_interval() -> u64 {
    15
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        // Load environment variables from .env if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ZFS_EVENT_EXPORTER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("snapshots.exclude_names")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the exporter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.textfile.interval_seconds == 0 {
            anyhow::bail!("textfile.interval_seconds must be greater than 0");
        }
        if self.zfs.zpool_path.trim().is_empty() || self.zfs.zfs_path.trim().is_empty() {
            anyhow::bail!("zfs.zpool_path and zfs.zfs_path must not be empty");
        }
        Ok(())
    }
}
