//! `zpool status` Topology Parser
//!
//! Rebuilds the pool → vdev → disk hierarchy from the columnar `config:` section of
//! `zpool status -pP` output. The report is a flat stream of lines whose nesting is
//! only expressed through indentation, so the parser keeps an explicit trace of
//! name segments (one per indentation level) instead of recursing.
//!
//! ```text
//!  pool: rpool
//!  state: ONLINE
//! config:
//!
//!         NAME                       STATE     READ WRITE CKSUM
//!         rpool                      ONLINE       0     0     0
//!           raidz1-0                 ONLINE       0     0     0
//!             /dev/disk/by-id/id1    ONLINE       0     0     0
//!         cache
//!           /dev/sda3                ONLINE       0     0     0
//! ```
//!
//! - A `pool:` line starts a new pool and resets the trace.
//! - The `NAME` header fixes the column where names begin; everything left of it is
//!   decoration and is stripped from subsequent rows.
//! - Each row's level is its count of leading spaces divided by two (tabs ignored).
//! - Rows with at least 5 fields carry `READ WRITE CKSUM` counters; shorter rows
//!   (`cache`, `logs`, spares) only contribute topology.
//!
//! Parsing is a pure function of the input text: the same report always yields an
//! identical forest, in source line order.

use crate::error::{ExporterError, LineError, Result};

/// One of the six device health states reported by ZFS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Online,
    Degraded,
    Faulted,
    Offline,
    Unavail,
    Removed,
}

impl HealthState {
    /// All states, in exposition order
    pub const ALL: [HealthState; 6] = [
        HealthState::Online,
        HealthState::Degraded,
        HealthState::Faulted,
        HealthState::Offline,
        HealthState::Unavail,
        HealthState::Removed,
    ];

    /// Parses the STATE column (case-insensitive)
    ///
    /// Returns `None` for states outside the fixed set (e.g. `AVAIL` on spares,
    /// `SUSPENDED`), so that novel states never break a scrape.
    pub fn parse(state: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_label().eq_ignore_ascii_case(state))
    }

    /// Label value used in the `state` label
    pub fn as_label(self) -> &'static str {
        match self {
            HealthState::Online => "online",
            HealthState::Degraded => "degraded",
            HealthState::Faulted => "faulted",
            HealthState::Offline => "offline",
            HealthState::Unavail => "unavail",
            HealthState::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Pool,
    Vdev,
    Disk,
}

/// Cumulative error counters of a row (since pool import)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    pub read: u64,
    pub write: u64,
    pub checksum: u64,
}

/// A row of the config section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNode {
    /// Name segments from the pool root down to (and including) this node
    pub path: Vec<String>,
    pub kind: NodeKind,
    /// `None` when the row has no state column or an unrecognized state
    pub health: Option<HealthState>,
    /// `None` for rows that only describe topology
    pub errors: Option<ErrorCounts>,
    pub children: Vec<TopologyNode>,
}

impl TopologyNode {
    /// The row's own name token (a device path for disks)
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Label identifying the pool a node belongs to
    ///
    /// Containers use their full trace (`rpool/raidz1-0`); disks use the trace of
    /// their parent container.
    pub fn pool_label(&self) -> String {
        match self.kind {
            NodeKind::Disk => self.path[..self.path.len().saturating_sub(1)].join("/"),
            NodeKind::Pool | NodeKind::Vdev => self.path.join("/"),
        }
    }

    /// Depth-first walk in source order
    pub fn walk(&self) -> impl Iterator<Item = &TopologyNode> {
        let mut pending = vec![self];
        std::iter::from_fn(move || {
            let node = pending.pop()?;
            pending.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

/// Parsed `zpool status` report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub roots: Vec<TopologyNode>,
}

impl StatusReport {
    /// Every node of the forest, depth-first, in source line order
    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.roots.iter().flat_map(TopologyNode::walk)
    }
}

/// Indentation level of a row: leading spaces / 2, tabs do not count
fn indent_level(line: &str) -> usize {
    let spaces = line
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .filter(|c| *c == ' ')
        .count();
    spaces / 2
}

/// Parses the READ/WRITE/CKSUM columns, reporting every bad column at once
///
/// The counters sit right after NAME and STATE; failing devices may carry
/// trailing notes (`was /dev/sdb1`, `too many errors`) after them.
fn parse_error_counts(fields: &[&str]) -> std::result::Result<ErrorCounts, Vec<String>> {
    let Some([read, write, checksum]) = fields.get(2..5) else {
        return Err(vec!["not enough fields".to_string()]);
    };

    let mut causes = Vec::new();
    let mut parse = |label: &str, value: &str| {
        value.parse::<u64>().unwrap_or_else(|e| {
            causes.push(format!("invalid {label} errors {value:?}: {e}"));
            0
        })
    };
    let counts = ErrorCounts {
        read: parse("read", *read),
        write: parse("write", *write),
        checksum: parse("checksum", *checksum),
    };

    if causes.is_empty() {
        Ok(counts)
    } else {
        Err(causes)
    }
}

/// Builds the forest from rows arriving in source order
///
/// `open[i]` is the unfinished node at depth `i`. A row at depth `d` closes every
/// open node at depth `>= d` (attaching it to its parent) before being pushed.
#[derive(Default)]
struct ForestBuilder {
    roots: Vec<TopologyNode>,
    open: Vec<TopologyNode>,
}

impl ForestBuilder {
    fn push(&mut self, node: TopologyNode) {
        let depth = node.path.len().saturating_sub(1);
        self.close_to(depth);
        self.open.push(node);
    }

    fn close_to(&mut self, depth: usize) {
        while self.open.len() > depth {
            let Some(node) = self.open.pop() else { break };
            match self.open.last_mut() {
                Some(parent) => parent.children.push(node),
                None => self.roots.push(node),
            }
        }
    }

    fn finish(mut self) -> Vec<TopologyNode> {
        self.close_to(0);
        self.roots
    }
}

/// Parses a full `zpool status -pP` report
///
/// # Errors
///
/// Returns [`ExporterError::Parse`] listing every row whose error counters are not
/// unsigned integers. No partial report is returned.
pub fn parse_status(report: &str) -> Result<StatusReport> {
    let mut builder = ForestBuilder::default();
    let mut failures = Vec::new();

    let mut trace: Vec<String> = Vec::new();
    // column where device names start, known once the NAME header was seen
    let mut name_offset: Option<usize> = None;

    for (index, line) in report.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = fields.first() else {
            continue;
        };

        if first == "pool:" {
            builder.close_to(0);
            name_offset = None;
            trace = fields.get(1).map(|name| name.to_string()).into_iter().collect();
            continue;
        }
        // any other `label:` line ends the config table (e.g. `errors:`)
        if first.ends_with(':') {
            name_offset = None;
            continue;
        }
        if first == "NAME" {
            name_offset = line.find("NAME");
            continue;
        }
        let Some(offset) = name_offset else {
            continue;
        };

        let row = line.get(offset..).unwrap_or_default();
        trace.truncate(indent_level(row) + 1);
        trace.push(first.to_string());

        // the pool's own row repeats the name given on the `pool:` line
        let path = match trace.as_slice() {
            [pool, row_name, ..] if pool == row_name => trace[1..].to_vec(),
            _ => trace.clone(),
        };

        let kind = if first.starts_with('/') && path.len() >= 2 {
            NodeKind::Disk
        } else if path.len() == 1 {
            NodeKind::Pool
        } else {
            NodeKind::Vdev
        };

        let errors = if fields.len() >= 5 {
            match parse_error_counts(&fields) {
                Ok(counts) => Some(counts),
                Err(causes) => {
                    failures.push(LineError::new(index + 1, line, causes));
                    continue;
                }
            }
        } else {
            None
        };

        builder.push(TopologyNode {
            path,
            kind,
            health: fields.get(1).and_then(|state| HealthState::parse(state)),
            errors,
            children: Vec::new(),
        });
    }

    if !failures.is_empty() {
        return Err(ExporterError::Parse {
            input: "zpool status",
            lines: failures,
        });
    }

    Ok(StatusReport {
        roots: builder.finish(),
    })
}
