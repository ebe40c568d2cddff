use std::fmt;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    /// One or more malformed lines in a status report or snapshot listing.
    /// The whole batch is rejected; nothing from it is applied.
    #[error("Parse error in {input}: {}", LineErrors(.lines))]
    Parse {
        input: &'static str,
        lines: Vec<LineError>,
    },

    #[error("Failed to run `{command}`: {source}")]
    CommandStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Malformed numeric field in the live event stream, terminal for the decoder
    #[error("Event stream decode error at line {line_number}: {reason}")]
    Decode { line_number: usize, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rejected input line with every reason it was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line_number: usize,
    pub line: String,
    pub causes: Vec<String>,
}

impl LineError {
    pub fn new(line_number: usize, line: &str, causes: Vec<String>) -> Self {
        Self {
            line_number,
            line: line.to_string(),
            causes,
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {} {:?}: {}",
            self.line_number,
            self.line,
            self.causes.join(", ")
        )
    }
}

struct LineErrors<'a>(&'a [LineError]);

impl fmt::Display for LineErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
