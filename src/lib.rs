//! Live video augmentation pipeline.
//!
//! A background capture thread reads frames from a blocking source (camera,
//! file or RTSP stream), applies a per-frame augmentation and offers each frame
//! to a small bounded buffer. The display side pulls frames from that buffer at
//! its own pace. On demand, a single frame can be taken from the live buffer and
//! sent with a text prompt to a remote vision-language service.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` rasters and the drop-newest `FrameBuffer`
//! - `ingest`: source selection and blocking `FrameSource` backends
//! - `augment`: per-frame transforms (none, grayscale, text overlay)
//! - `capture`: the capture worker thread
//! - `controller`: session lifecycle and the paced `FrameStream`
//! - `query`: remote inference queries
//! - `config`, `error`, `ui`: configuration, error types and CLI output

pub mod augment;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod query;
pub mod ui;

pub use augment::{apply, transform_for, AugmentationOp, OverlayStyle, Transform};
pub use capture::{spawn_capture, CaptureExit, CaptureJob, CaptureSummary, CaptureWorker};
pub use config::{AppConfig, StreamSettings};
pub use controller::{
    FrameStream, SessionHandle, SessionState, StartRequest, StreamController, StreamSession,
};
pub use error::{CaptureError, ConfigError, QueryError, StreamError, ValidationError};
pub use frame::{Frame, FrameBuffer, PixelLayout, PushOutcome, DEFAULT_BUFFER_CAPACITY};
pub use ingest::{
    resolve_source, BackendOpener, CaptureParams, CapturedImage, FrameSource, RawPixelFormat,
    SourceInputs, SourceKind, SourceOpener, SourceSelection, VideoSource,
};
pub use query::{
    HttpInferenceClient, InferenceClient, InferenceReply, QueryDispatcher, QueryResult,
};
