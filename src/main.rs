use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zfs_event_exporter::{config::Config, server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/Default.toml")]
    config: String,

    /// Port to listen on for metrics (overrides config)
    #[arg(short, long, env = "EXPORTER_PORT")]
    port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long, env = "EXPORTER_ADDR")]
    addr: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "EXPORTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write the metrics to this file, e.g. for node_exporter's textfile collector
    #[arg(long, env = "EXPORTER_TEXT_FILE_OUTPUT")]
    text_file_output: Option<PathBuf>,

    /// Regular expression on `dataset@snapshot`; matching snapshots are not tracked (repeatable)
    #[arg(long = "exclude-snapshot-name", value_name = "REGEX")]
    exclude_snapshot_names: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ZFS Event Exporter v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let mut config = Config::load(&args.config)?;

    // Override with CLI arguments if provided
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(path) = args.text_file_output {
        config.textfile.path = Some(path);
    }
    config
        .snapshots
        .exclude_names
        .extend(args.exclude_snapshot_names);

    info!("Configuration loaded successfully");
    info!(
        "Metrics endpoint: http://{}:{}/metrics",
        config.server.addr, config.server.port
    );
    if let Some(path) = &config.textfile.path {
        info!("Text file output: {}", path.display());
    }

    // Start the metrics server
    if let Err(e) = server::start(config).await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
