//! Video sources.
//!
//! This module turns a user's source selection into a concrete `VideoSource`
//! and opens it as a blocking `FrameSource`:
//! - Camera devices (feature: ingest-v4l2)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - RTSP streams (feature: rtsp-gstreamer)
//! - Synthetic `stub://` sources for every kind (always available, used by tests)
//!
//! Sources only hand out raw images. Conversion to the display channel order
//! and per-frame augmentation happen on the capture worker.
//!
//! A `FrameSource` owns the OS-level capture handle. Dropping it releases the
//! handle, so the worker releases deterministically on every exit path.

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
mod rtsp;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ValidationError;
use crate::frame::{DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_TARGET_FPS};

pub use normalize::{normalize_to_rgb, RawPixelFormat};
pub use synthetic::SyntheticSource;

/// Prefix selecting the synthetic backend regardless of source kind.
pub const STUB_PREFIX: &str = "stub://";

// ----------------------------------------------------------------------------
// Selection and resolution
// ----------------------------------------------------------------------------

/// Which kind of input the user picked. Resolved into a `VideoSource` at start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceSelection {
    #[default]
    Webcam,
    File,
    RtspStream,
}

impl FromStr for SourceSelection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "webcam" | "camera" | "device" => Ok(SourceSelection::Webcam),
            "file" => Ok(SourceSelection::File),
            "rtsp" | "rtsp-stream" | "stream" => Ok(SourceSelection::RtspStream),
            other => Err(format!(
                "unknown source '{}'; expected webcam, file or rtsp",
                other
            )),
        }
    }
}

/// User-provided inputs that accompany a selection. Only the field matching
/// the selection is consulted.
#[derive(Clone, Debug, Default)]
pub struct SourceInputs {
    pub file: Option<PathBuf>,
    pub rtsp_url: Option<String>,
}

/// A concrete source for one stream session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VideoSource {
    /// Camera device address from configuration (e.g. "/dev/video0").
    Device(String),
    File(PathBuf),
    RtspUrl(String),
}

impl VideoSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            VideoSource::Device(_) => SourceKind::Device,
            VideoSource::File(_) => SourceKind::File,
            VideoSource::RtspUrl(_) => SourceKind::Stream,
        }
    }

    /// Address, path or URL as a string, for logging and backend dispatch.
    pub fn location(&self) -> String {
        match self {
            VideoSource::Device(address) => address.clone(),
            VideoSource::File(path) => path.display().to_string(),
            VideoSource::RtspUrl(url) => url.clone(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.location().starts_with(STUB_PREFIX)
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.location())
    }
}

/// Source family, used to word open-failure warnings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Device,
    File,
    Stream,
}

impl SourceKind {
    /// User-facing warning shown when a source of this kind fails to open.
    pub fn open_failure_message(self) -> &'static str {
        match self {
            SourceKind::Device => "Unable to open camera",
            SourceKind::File => "Unable to open file",
            SourceKind::Stream => "Unable to open RTSP Stream",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Device => "camera",
            SourceKind::File => "file",
            SourceKind::Stream => "RTSP stream",
        })
    }
}

/// Resolve a selection into a concrete source.
///
/// Webcam uses the configured `camera_address` with no runtime override.
/// File requires a chosen, non-empty path. RTSP requires a URL that is
/// non-empty after trimming.
pub fn resolve_source(
    selection: SourceSelection,
    inputs: &SourceInputs,
    camera_address: &str,
) -> Result<VideoSource, ValidationError> {
    match selection {
        SourceSelection::Webcam => {
            let address = require_text(Some(camera_address), "Camera address")?;
            Ok(VideoSource::Device(address))
        }
        SourceSelection::File => inputs
            .file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| VideoSource::File(path.to_path_buf()))
            .ok_or(ValidationError::NoFileSelected),
        SourceSelection::RtspStream => {
            let url = require_text(inputs.rtsp_url.as_deref(), "RTSP Stream")?;
            Ok(VideoSource::RtspUrl(url))
        }
    }
}

/// Trim `value` and reject it when nothing is left.
pub fn require_text(value: Option<&str>, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText { field });
    }
    Ok(trimmed.to_string())
}

// ----------------------------------------------------------------------------
// Backend seam
// ----------------------------------------------------------------------------

/// Capture parameters requested from a source. Sources may not honour them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureParams {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

/// One undecoded image as delivered by a backend.
#[derive(Clone, Debug)]
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: RawPixelFormat,
}

/// An opened, blocking video source.
///
/// Dropping the value releases the underlying capture handle.
pub trait FrameSource: Send {
    /// Block until the next image is read.
    ///
    /// `Ok(None)` means the source reached its end. Errors are treated as
    /// terminal by the capture worker.
    fn next_image(&mut self) -> Result<Option<CapturedImage>>;
}

/// Opens a `VideoSource`. Called only on the capture worker thread.
pub trait SourceOpener: Send + Sync {
    fn open(&self, source: &VideoSource, params: &CaptureParams) -> Result<Box<dyn FrameSource>>;
}

/// Default opener: `stub://` locations go to the synthetic backend, everything
/// else to the feature-gated backend for the source's kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackendOpener;

impl SourceOpener for BackendOpener {
    fn open(&self, source: &VideoSource, params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
        if source.is_synthetic() {
            let mut synthetic = SyntheticSource::new(&source.location(), *params)?;
            synthetic.connect()?;
            return Ok(Box::new(synthetic));
        }
        match source {
            VideoSource::Device(address) => open_device(address, params),
            VideoSource::File(path) => open_file(path, params),
            VideoSource::RtspUrl(url) => open_rtsp(url, params),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(address: &str, params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    let mut source = v4l2::V4l2Source::new(address, *params);
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(address: &str, _params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("camera {} requires the ingest-v4l2 feature", address)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_file(path: &Path, params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    let mut source = file_ffmpeg::FfmpegFileSource::new(path, *params)?;
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_file(path: &Path, _params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "file {} requires the ingest-file-ffmpeg feature",
        path.display()
    )
}

#[cfg(feature = "rtsp-gstreamer")]
fn open_rtsp(url: &str, params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    let mut source = rtsp::GstreamerRtspSource::new(url, *params)?;
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn open_rtsp(url: &str, _params: &CaptureParams) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("RTSP stream {} requires the rtsp-gstreamer feature", url)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
