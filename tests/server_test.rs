//! Server integration tests
//!
//! Tests for HTTP endpoints, served from a real listener with a scripted `zpool`.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use zfs_event_exporter::config::{Config, ServerConfig, TextFileConfig, ZfsConfig};
use zfs_event_exporter::metrics::MetricsCollector;
use zfs_event_exporter::server::{self, router, AppState};
use zfs_event_exporter::zfs::{SnapshotStore, ZfsCommands};

const STATUS: &str = "  pool: tank
 state: ONLINE
config:

\tNAME        STATE     READ WRITE CKSUM
\ttank        ONLINE       0     0     0
\t  /dev/sda  ONLINE       0     0     0

errors: No known data errors
";

/// Writes an executable script printing `stdout` and exiting with `code`
fn write_script(dir: &Path, name: &str, stdout: &str, code: i32) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\ncat <<'EOF'\n{stdout}EOF\nexit {code}\n");
    std::fs::write(&path, script).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}

/// Helper to create app state around a `zpool` binary
fn create_test_state(zpool_path: &Path) -> (AppState, MetricsCollector) {
    let metrics = MetricsCollector::new().expect("Failed to create metrics");
    let store = Arc::new(SnapshotStore::new(|_, _| true));
    store
        .full_sync("tank/ds@daily 1700000000 4096\n")
        .expect("Sync failed");
    let zfs = ZfsCommands::new(&ZfsConfig {
        zpool_path: zpool_path.display().to_string(),
        zfs_path: "zfs".to_string(),
    });
    (AppState::new(metrics.clone(), store, zfs), metrics)
}

/// Serves `state` on an ephemeral port and returns its address
async fn serve(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address").to_string();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.ok();
    });
    addr
}

/// Sends a GET request and returns the status code and body
async fn get(addr: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to send request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("Failed to read response");

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("Malformed status line");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    // Given: A server whose zpool prints a healthy pool
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let zpool = write_script(dir.path(), "zpool", STATUS, 0);
    let (state, _) = create_test_state(&zpool);
    let addr = serve(state).await;

    // When: Scraping /metrics
    let (status, body) = get(&addr, "/metrics").await;

    // Then: Pool, disk and snapshot series are rendered
    assert_eq!(status, 200);
    assert!(body.contains("# HELP"), "Missing HELP comment");
    assert!(body.contains("# TYPE"), "Missing TYPE comment");
    assert!(body.contains("zfs_pool_status{pool=\"tank\",state=\"online\"} 1"));
    assert!(body.contains("zfs_pool_disk_status{disk=\"/dev/sda\",pool=\"tank\",state=\"online\"} 1"));
    assert!(body.contains("zfs_snapshot_count{dataset=\"tank/ds\"} 1"));
    assert!(body.contains("zfs_snapshot_disk_used{dataset=\"tank/ds\"} 4096"));
}

#[tokio::test]
async fn test_metrics_endpoint_fails_when_zpool_fails() {
    // Given: A zpool that exits non-zero
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let zpool = write_script(dir.path(), "zpool", "", 1);
    let (state, _) = create_test_state(&zpool);
    let addr = serve(state).await;

    // When: Scraping /metrics
    let (status, body) = get(&addr, "/metrics").await;

    // Then: The scrape fails with the cause
    assert_eq!(status, 500);
    assert!(body.contains("Failed to query pool status"));
}

#[tokio::test]
async fn test_metrics_endpoint_fails_on_unparsable_status() {
    // Given: A zpool printing malformed counters
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let broken = STATUS.replace("ONLINE       0     0     0", "ONLINE       a     b     c");
    let zpool = write_script(dir.path(), "zpool", &broken, 0);
    let (state, _) = create_test_state(&zpool);
    let addr = serve(state).await;

    // When: Scraping /metrics
    let (status, body) = get(&addr, "/metrics").await;

    // Then: The scrape fails and names the parse error
    assert_eq!(status, 500);
    assert!(body.contains("Parse error in zpool status"));
}

#[tokio::test]
async fn test_metrics_endpoint_fails_when_zpool_missing() {
    // Given: A zpool path that does not exist
    let (state, _) = create_test_state(Path::new("/nonexistent/zpool"));
    let addr = serve(state).await;

    // When: Scraping /metrics
    let (status, _) = get(&addr, "/metrics").await;

    // Then: The scrape fails
    assert_eq!(status, 500);
}

#[tokio::test]
async fn test_health_follows_event_stream() {
    // Given: A server whose event stream has not started
    let (state, metrics) = create_test_state(Path::new("/nonexistent/zpool"));
    let addr = serve(state).await;

    // When/Then: Health is unavailable until the stream is up
    let (status, _) = get(&addr, "/health").await;
    assert_eq!(status, 503);

    metrics.set_event_stream_up(true);
    let (status, body) = get(&addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_root_page_links_endpoints() {
    // Given: A running server
    let (state, _) = create_test_state(Path::new("/nonexistent/zpool"));
    let addr = serve(state).await;

    // When: Requesting the landing page
    let (status, body) = get(&addr, "/").await;

    // Then: It links metrics and health
    assert_eq!(status, 200);
    assert!(body.contains("href=\"/metrics\""));
    assert!(body.contains("href=\"/health\""));
}

#[tokio::test]
async fn test_run_with_text_file_stops_cleanly_on_cancel() {
    // Given: Scripted `zpool`/`zfs` binaries and a text file output
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let zpool = dir.path().join("zpool");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"status\" ]; then\ncat <<'EOF'\n{STATUS}EOF\nfi\nexit 0\n"
    );
    std::fs::write(&zpool, script).expect("Failed to write script");
    std::fs::set_permissions(&zpool, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    let zfs = write_script(dir.path(), "zfs", "tank/ds@daily\t1700000000\t4096\n", 0);
    let output = dir.path().join("zfs.prom");

    let config = Config {
        server: ServerConfig {
            addr: "127.0.0.1".to_string(),
            port: 0,
        },
        zfs: ZfsConfig {
            zpool_path: zpool.display().to_string(),
            zfs_path: zfs.display().to_string(),
        },
        textfile: TextFileConfig {
            path: Some(output.clone()),
            interval_seconds: 1,
        },
        ..Config::default()
    };
    let cancel = CancellationToken::new();
    let running = tokio::spawn(server::run(config, cancel.clone()));

    // When: The first text file is written and the exporter is cancelled
    for _ in 0..100 {
        if output.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("Exporter did not stop")
        .expect("Exporter task panicked");

    // Then: The exporter joined its text file task and stopped without error
    assert!(result.is_ok(), "Exporter failed: {:?}", result.err());
    let written = std::fs::read_to_string(&output).expect("Read failed");
    assert!(written.contains(r#"zfs_snapshot_count{dataset="tank/ds"} 1"#));
    assert!(!dir.path().join("zfs.prom.tmp").exists());
}
