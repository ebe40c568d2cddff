//! `zpool events` Stream Decoder
//!
//! The live feed (`zpool events -vfH`) prints one record per event: a header line,
//! then indented `key = value` lines, then a blank line.
//!
//! ```text
//! Nov 23 2023 04:45:52.593086010 sysevent.fs.zfs.history_event
//!         history_dsname = "pool-hdd/backup/var@zrepl_20231122_231701_000"
//!         history_internal_name = "snapshot"
//!         time = 0x655ecb10 0x235a3d7a
//!
//! ```
//!
//! [`EventDecoder`] is a pure line-at-a-time state machine. [`decode_stream`] drives
//! it over an async reader and pushes events into a bounded queue, and
//! [`EventConsumer`] drains that queue into the [`SnapshotStore`]. Both sides only
//! look at cancellation between whole records.

use crate::error::{ExporterError, Result};
use crate::metrics::MetricsCollector;
use crate::zfs::snapshot::{split_snapshot_name, SnapshotStore};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the queue between the decoder and the consumer
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Event timestamp as printed by the kernel: seconds and nanoseconds since the epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    pub secs: i64,
    pub nanos: i64,
}

/// A decoded event record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZfsEvent {
    SnapshotCreated {
        dataset: String,
        snapshot: String,
        time: EventTime,
    },
    SnapshotDestroyed {
        dataset: String,
        snapshot: String,
        time: EventTime,
    },
    /// Any other action, or a record without an action (e.g. a vdev state change)
    Other {
        action: String,
        name: String,
        time: EventTime,
    },
}

impl ZfsEvent {
    /// Value of the `action` label in `zfs_events_total`
    pub fn action(&self) -> &str {
        match self {
            ZfsEvent::SnapshotCreated { .. } => "snapshot",
            ZfsEvent::SnapshotDestroyed { .. } => "destroy",
            ZfsEvent::Other { action, .. } if action.is_empty() => "none",
            ZfsEvent::Other { action, .. } => action,
        }
    }

    pub fn time(&self) -> EventTime {
        match self {
            ZfsEvent::SnapshotCreated { time, .. }
            | ZfsEvent::SnapshotDestroyed { time, .. }
            | ZfsEvent::Other { time, .. } => *time,
        }
    }
}

/// Parses an integer the way the kernel may print it
///
/// Accepts an optional sign, then `0x`/`0o`/`0b` prefixed, leading-zero octal, or
/// plain decimal digits. Underscores between digits are ignored.
pub fn parse_int_auto(text: &str) -> std::result::Result<i64, String> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (radix, digits) = if let Some(rest) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        (16, rest)
    } else if let Some(rest) = unsigned
        .strip_prefix("0o")
        .or_else(|| unsigned.strip_prefix("0O"))
    {
        (8, rest)
    } else if let Some(rest) = unsigned
        .strip_prefix("0b")
        .or_else(|| unsigned.strip_prefix("0B"))
    {
        (2, rest)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, &unsigned[1..])
    } else {
        (10, unsigned)
    };

    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(format!("invalid integer {text:?}"));
    }

    let signed = if negative {
        format!("-{digits}")
    } else {
        digits
    };
    i64::from_str_radix(&signed, radix).map_err(|e| format!("invalid integer {text:?}: {e}"))
}

fn trim_double_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DecoderState {
    #[default]
    AwaitingHeader,
    ReadingFields,
}

/// Fields of the record currently being assembled
#[derive(Debug, Default)]
struct PendingEvent {
    action: String,
    ds_name: String,
    time: EventTime,
}

impl PendingEvent {
    fn into_event(self) -> ZfsEvent {
        let split = split_snapshot_name(&self.ds_name)
            .map(|(dataset, snapshot)| (dataset.to_string(), snapshot.to_string()));
        match (self.action.as_str(), split) {
            ("snapshot", Some((dataset, snapshot))) => ZfsEvent::SnapshotCreated {
                dataset,
                snapshot,
                time: self.time,
            },
            ("destroy", Some((dataset, snapshot))) => ZfsEvent::SnapshotDestroyed {
                dataset,
                snapshot,
                time: self.time,
            },
            _ => ZfsEvent::Other {
                action: self.action,
                name: self.ds_name,
                time: self.time,
            },
        }
    }
}

/// Line-at-a-time decoder for the `zpool events -vH` format
#[derive(Debug, Default)]
pub struct EventDecoder {
    state: DecoderState,
    line_number: usize,
    pending: PendingEvent,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no record is partially read
    pub fn at_record_boundary(&self) -> bool {
        self.state == DecoderState::AwaitingHeader
    }

    /// Feeds one line (without its terminator)
    ///
    /// Returns the completed event when `line` is the blank line closing a record.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Decode`] when a `time` field does not hold integers.
    /// The decoder must not be fed further after an error.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<ZfsEvent>> {
        self.line_number += 1;

        if line.is_empty() {
            return Ok(match self.state {
                DecoderState::AwaitingHeader => None,
                DecoderState::ReadingFields => {
                    self.state = DecoderState::AwaitingHeader;
                    Some(std::mem::take(&mut self.pending).into_event())
                }
            });
        }

        if self.state == DecoderState::AwaitingHeader {
            trace!("Event record start: {}", line);
            self.state = DecoderState::ReadingFields;
            return Ok(None);
        }

        let Some((key, rest)) = line.split_once('=') else {
            return Ok(None);
        };
        let key = key.trim();
        if key.is_empty() || rest.is_empty() {
            return Ok(None);
        }
        let value = rest.strip_prefix(' ').unwrap_or(rest);

        match key {
            "time" => {
                let fields: Vec<&str> = value.split_whitespace().collect();
                if let [secs, nanos, ..] = fields.as_slice() {
                    self.pending.time = EventTime {
                        secs: self.parse_time_field("seconds", secs)?,
                        nanos: self.parse_time_field("nanoseconds", nanos)?,
                    };
                }
            }
            "history_internal_name" => self.pending.action = trim_double_quotes(value).to_string(),
            "history_dsname" => self.pending.ds_name = trim_double_quotes(value).to_string(),
            _ => trace!("Unused event key {}={}", key, value),
        }
        Ok(None)
    }

    fn parse_time_field(&self, field: &str, value: &str) -> Result<i64> {
        parse_int_auto(value).map_err(|reason| ExporterError::Decode {
            line_number: self.line_number,
            reason: format!("unable to parse {field}: {reason}"),
        })
    }
}

/// Decodes `reader` until EOF, cancellation or the first decode error
///
/// Events are sent to `events`; a closed queue ends decoding. Cancellation is only
/// honoured while waiting for the next record, never inside one. A record cut off by
/// EOF is dropped.
pub async fn decode_stream<R>(
    reader: R,
    events: mpsc::Sender<ZfsEvent>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut decoder = EventDecoder::new();

    loop {
        let line = if decoder.at_record_boundary() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Event decoder cancelled");
                    return Ok(());
                }
                line = lines.next_line() => line?,
            }
        } else {
            lines.next_line().await?
        };

        let Some(line) = line else {
            return Ok(());
        };

        if let Some(event) = decoder.feed_line(&line)? {
            if events.send(event).await.is_err() {
                debug!("Event queue closed, stopping decoder");
                return Ok(());
            }
        }
    }
}

/// Lists the snapshots of a single dataset, in `zfs list -Hp` format
pub trait SnapshotLister: Send + Sync {
    fn list_snapshots(&self, dataset: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Applies decoded events to the snapshot store
pub struct EventConsumer<L> {
    store: Arc<SnapshotStore>,
    lister: L,
    metrics: MetricsCollector,
}

impl<L: SnapshotLister> EventConsumer<L> {
    pub fn new(store: Arc<SnapshotStore>, lister: L, metrics: MetricsCollector) -> Self {
        Self {
            store,
            lister,
            metrics,
        }
    }

    /// Applies one event
    ///
    /// A destroyed snapshot is removed directly. A created snapshot triggers a
    /// re-listing of its dataset, merged into the store; a failed re-listing is
    /// logged and leaves the store unchanged.
    pub async fn apply(&self, event: &ZfsEvent) {
        self.metrics
            .events_total
            .with_label_values(&[event.action()])
            .inc();

        match event {
            ZfsEvent::SnapshotDestroyed {
                dataset, snapshot, ..
            } => {
                let removed = self.store.remove(dataset, snapshot);
                debug!("Snapshot {}@{} destroyed ({} removed)", dataset, snapshot, removed);
            }
            ZfsEvent::SnapshotCreated {
                dataset, snapshot, ..
            } => {
                let synced = match self.lister.list_snapshots(dataset).await {
                    Ok(listing) => self.store.full_sync(&listing),
                    Err(e) => Err(e),
                };
                match synced {
                    Ok(added) => debug!(
                        "Snapshot {}@{} created ({} records added)",
                        dataset, snapshot, added
                    ),
                    Err(e) => warn!(
                        "Failed to refresh snapshots of {} after creation of {}: {}",
                        dataset, snapshot, e
                    ),
                }
            }
            ZfsEvent::Other { action, name, .. } => {
                debug!("Unused event action {:?} for {:?}", action, name);
            }
        }
    }

    /// Drains `events` until the queue closes or `cancel` fires
    pub async fn run(&self, mut events: mpsc::Receiver<ZfsEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.apply(&event).await,
                None => break,
            }
        }
    }
}

/// Runs the decoder as its own task and consumes its events on the current one
///
/// Marks the stream up for as long as both sides run. Returns the decoder's
/// outcome: `Ok` on EOF or cancellation, the error that stopped it otherwise.
pub async fn run_pipeline<R, L>(
    reader: R,
    consumer: EventConsumer<L>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    L: SnapshotLister,
{
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let producer = tokio::spawn(decode_stream(reader, tx, cancel.clone()));

    consumer.metrics.set_event_stream_up(true);
    info!("Consuming zpool events");
    consumer.run(rx, cancel.clone()).await;
    consumer.metrics.set_event_stream_up(false);

    // the consumer only stops early on cancellation, which the decoder sees too
    let decoded = match producer.await {
        Ok(result) => result,
        Err(e) => Err(ExporterError::Server(format!("event decoder task failed: {e}"))),
    };

    match &decoded {
        Ok(()) if cancel.is_cancelled() => info!("Event stream stopped"),
        Ok(()) => warn!("Event stream ended, snapshot metrics will no longer follow events"),
        Err(e) => error!("Event stream failed, snapshot metrics will no longer follow events: {}", e),
    }
    decoded
}
