//! Background capture worker.
//!
//! One worker thread per stream session. It opens the source, then loops:
//! check the stop flag, read one image, normalise it to RGB, apply the session's
//! per-frame transform and offer the frame to the buffer (drop-newest). The
//! first successfully captured frame fires the one-shot readiness signal.
//!
//! The worker never signals readiness on failure. It drops the readiness
//! sender instead, and the controller joins the thread to learn why.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::augment::{transform_for, AugmentationOp};
use crate::controller::StreamSession;
use crate::error::{CaptureError, StreamError};
use crate::frame::{Frame, FrameBuffer, PushOutcome};
use crate::ingest::{normalize_to_rgb, CaptureParams, CapturedImage, SourceOpener, VideoSource};

/// Everything the worker needs to run one session.
#[derive(Clone, Debug)]
pub struct CaptureJob {
    pub source: VideoSource,
    pub params: CaptureParams,
    pub operation: AugmentationOp,
    /// Validated overlay text, present only for `TextOverlay`.
    pub overlay_text: Option<String>,
}

/// Why the capture loop ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureExit {
    #[default]
    Stopped,
    EndOfStream,
    ReadError,
}

/// Per-session capture statistics, returned when the worker is joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub captured: u64,
    /// Frames discarded because the buffer was full.
    pub dropped: u64,
    pub exit: CaptureExit,
}

/// Handle to a running capture thread.
#[derive(Debug)]
pub struct CaptureWorker {
    handle: JoinHandle<Result<CaptureSummary, CaptureError>>,
    session: Arc<StreamSession>,
}

impl CaptureWorker {
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit. Blocks while the source is inside a read.
    pub fn join(self) -> Result<CaptureSummary, StreamError> {
        match self.handle.join() {
            Ok(result) => result.map_err(StreamError::from),
            Err(_) => {
                log::error!(
                    "CaptureWorker: session {} thread panicked",
                    self.session.id()
                );
                Err(StreamError::WorkerPanicked)
            }
        }
    }
}

/// Spawn the capture thread for `session`.
pub fn spawn_capture(
    job: CaptureJob,
    session: Arc<StreamSession>,
    buffer: Arc<FrameBuffer>,
    opener: Arc<dyn SourceOpener>,
    ready: SyncSender<()>,
) -> std::io::Result<CaptureWorker> {
    let thread_session = session.clone();
    let handle = std::thread::Builder::new()
        .name(format!("capture-{}", session.id()))
        .spawn(move || {
            let _finished = FinishedGuard(&thread_session);
            run_capture(job, &thread_session, &buffer, opener.as_ref(), ready)
        })?;
    Ok(CaptureWorker { handle, session })
}

/// Marks capture as finished on every exit path, panics included.
struct FinishedGuard<'a>(&'a StreamSession);

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_capture_finished();
    }
}

fn run_capture(
    job: CaptureJob,
    session: &StreamSession,
    buffer: &FrameBuffer,
    opener: &dyn SourceOpener,
    ready: SyncSender<()>,
) -> Result<CaptureSummary, CaptureError> {
    let kind = job.source.kind();
    let mut source = match opener.open(&job.source, &job.params) {
        Ok(source) => source,
        Err(err) => {
            log::warn!("{}: {} ({:#})", kind.open_failure_message(), job.source, err);
            return Err(CaptureError::Open {
                kind,
                source: err.into(),
            });
        }
    };
    log::info!(
        "CaptureWorker: session {} reading {} ({})",
        session.id(),
        job.source,
        job.operation
    );

    let transform = transform_for(job.operation);
    let overlay_text = job.overlay_text.as_deref();
    let mut ready = Some(ready);
    let mut summary = CaptureSummary::default();

    summary.exit = loop {
        if session.is_stop_requested() {
            break CaptureExit::Stopped;
        }
        let image = match source.next_image() {
            Ok(Some(image)) => image,
            Ok(None) => break CaptureExit::EndOfStream,
            Err(err) => {
                log::warn!("CaptureWorker: read from {} failed: {:#}", job.source, err);
                break CaptureExit::ReadError;
            }
        };
        // A read can outlast a stop request; the frame belongs to no one then.
        if session.is_stop_requested() {
            break CaptureExit::Stopped;
        }
        let frame = match decode(image) {
            Ok(frame) => frame.with_sequence(summary.captured + 1),
            Err(err) => {
                log::warn!("CaptureWorker: bad frame from {}: {:#}", job.source, err);
                break CaptureExit::ReadError;
            }
        };
        let frame = match transform {
            Some(transform) => transform(frame, overlay_text),
            None => frame,
        };

        summary.captured += 1;
        if buffer.push(frame) == PushOutcome::Dropped {
            summary.dropped += 1;
        }
        if let Some(ready) = ready.take() {
            // The controller may have given up waiting; nothing to do then.
            let _ = ready.send(());
        }
    };

    drop(source);
    log::info!(
        "CaptureWorker: session {} ended ({:?}): {} captured, {} dropped",
        session.id(),
        summary.exit,
        summary.captured,
        summary.dropped
    );

    if summary.captured == 0 && summary.exit != CaptureExit::Stopped {
        log::warn!("{}: {} produced no frames", kind.open_failure_message(), job.source);
        return Err(CaptureError::EndedBeforeFirstFrame { kind });
    }
    Ok(summary)
}

fn decode(image: CapturedImage) -> Result<Frame> {
    let CapturedImage {
        pixels,
        width,
        height,
        format,
    } = image;
    let rgb = normalize_to_rgb(pixels, width, height, format)?;
    Frame::from_rgb(width, height, rgb).context("build RGB frame")
}
