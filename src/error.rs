//! Error types surfaced at the library boundary.
//!
//! The variants follow the pipeline's failure classes: input validation (no
//! resource touched), source open, mid-stream read, and remote query transport
//! or rejection. Every error is local and non-fatal to the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::SourceKind;

/// Boxed lower-level cause carried by capture and encode errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// User input rejected before any thread or device is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} cannot be an empty string!")]
    EmptyText { field: &'static str },
    #[error("No file selected!")]
    NoFileSelected,
}

/// Failures inside the capture worker.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source could not be opened. `Display` is the user-facing warning.
    #[error("{}", .kind.open_failure_message())]
    Open {
        kind: SourceKind,
        #[source]
        source: BoxError,
    },
    /// The source opened but closed before producing a single frame.
    #[error("{kind} ended before the first frame")]
    EndedBeforeFirstFrame { kind: SourceKind },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("capture did not become ready within {0:?}")]
    ReadyTimeout(std::time::Duration),
    #[error("session was stopped while starting")]
    Cancelled,
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture thread panicked")]
    WorkerPanicked,
}

impl StreamError {
    /// True for errors caused by user input rather than the source.
    pub fn is_validation(&self) -> bool {
        matches!(self, StreamError::Validation(_))
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("remote query requires the Remote Query operation")]
    WrongOperation,
    #[error("No Stream is Running!")]
    NotRunning,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("stream stopped before a frame was available")]
    SessionEnded,
    #[error("failed to encode frame: {0}")]
    Encode(#[source] BoxError),
    #[error("inference request failed: {0}")]
    Transport(String),
    #[error("inference service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
