//! Stream session lifecycle.
//!
//! `StreamController` owns at most one session, and a fresh frame buffer for each:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//! ```
//!
//! `start` validates the selection before anything is spawned, runs the capture
//! worker, waits for its first frame and returns a paced `FrameStream`. `stop`
//! raises the session's stop flag, joins the worker and drains the buffer. All
//! methods take `&self`, so one controller can be shared behind an `Arc` by the
//! display loop, a signal handler and the query path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::augment::AugmentationOp;
use crate::capture::{spawn_capture, CaptureJob, CaptureSummary, CaptureWorker};
use crate::config::{AppConfig, StreamSettings};
use crate::error::{StreamError, ValidationError};
use crate::frame::{Frame, FrameBuffer};
use crate::ingest::{
    require_text, resolve_source, BackendOpener, CaptureParams, SourceInputs, SourceOpener,
    SourceSelection, VideoSource,
};

/// Lifecycle of the controller's single session slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

/// State shared between the controller, the capture worker and every
/// consumer of one session.
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    operation: AugmentationOp,
    source: VideoSource,
    stop: AtomicBool,
    capture_finished: AtomicBool,
}

impl StreamSession {
    pub fn new(id: u64, operation: AugmentationOp, source: VideoSource) -> Self {
        Self {
            id,
            operation,
            source,
            stop: AtomicBool::new(false),
            capture_finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Operation fixed for the whole session.
    pub fn operation(&self) -> AugmentationOp {
        self.operation
    }

    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True once the capture thread has left its loop.
    pub fn is_capture_finished(&self) -> bool {
        self.capture_finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_capture_finished(&self) {
        self.capture_finished.store(true, Ordering::SeqCst);
    }
}

/// User input for `StreamController::start`.
#[derive(Clone, Debug, Default)]
pub struct StartRequest {
    pub selection: SourceSelection,
    pub inputs: SourceInputs,
    /// Overlay text, read only when the selected operation is `TextOverlay`.
    pub overlay_text: Option<String>,
}

#[derive(Default)]
struct SessionSlot {
    state: SessionState,
    session: Option<Arc<StreamSession>>,
    /// Present once the session reaches `Running`. During `Starting` the
    /// worker handle stays with the `start` call.
    worker: Option<CaptureWorker>,
}

pub struct StreamController {
    camera_address: String,
    params: CaptureParams,
    settings: StreamSettings,
    opener: Arc<dyn SourceOpener>,
    /// Buffer of the current (or last) session. Replaced on every start and
    /// after a failed start, so a detached worker never reaches a live buffer.
    buffer: Mutex<Arc<FrameBuffer>>,
    operation: Mutex<AugmentationOp>,
    slot: Mutex<SessionSlot>,
    next_session_id: AtomicU64,
}

impl StreamController {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_opener(config, Arc::new(BackendOpener))
    }

    /// Controller that opens sources through `opener` instead of the built-in backends.
    pub fn with_opener(config: &AppConfig, opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            camera_address: config.camera_address.clone(),
            params: config.capture,
            settings: config.stream.clone(),
            opener,
            buffer: Mutex::new(Arc::new(FrameBuffer::new(config.stream.buffer_capacity))),
            operation: Mutex::new(AugmentationOp::default()),
            slot: Mutex::new(SessionSlot::default()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Choose the operation for the next session. A running session keeps
    /// the operation it started with.
    pub fn select_operation(&self, op: AugmentationOp) {
        *self.operation.lock().unwrap_or_else(PoisonError::into_inner) = op;
    }

    pub fn selected_operation(&self) -> AugmentationOp {
        *self.operation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operation in effect: the running session's, else the selection.
    pub fn current_operation(&self) -> AugmentationOp {
        self.active_session()
            .map(|session| session.operation())
            .unwrap_or_else(|| self.selected_operation())
    }

    pub fn state(&self) -> SessionState {
        self.lock_slot().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn buffer(&self) -> Arc<FrameBuffer> {
        self.lock_buffer().clone()
    }

    /// The running session, if any.
    pub fn active_session(&self) -> Option<Arc<StreamSession>> {
        let slot = self.lock_slot();
        match slot.state {
            SessionState::Running => slot.session.clone(),
            _ => None,
        }
    }

    /// Handle for consumers that take frames outside the display stream.
    pub fn session_handle(&self) -> Option<SessionHandle> {
        let slot = self.lock_slot();
        match (&slot.state, &slot.session) {
            (SessionState::Running, Some(session)) => Some(SessionHandle {
                session: session.clone(),
                buffer: self.buffer(),
            }),
            _ => None,
        }
    }

    /// Start a session.
    ///
    /// Returns `Ok(None)` without side effects when a session already exists.
    /// Validation errors are returned before any thread is spawned. Otherwise
    /// blocks until the source delivers its first frame, fails, or the
    /// configured ready timeout passes.
    pub fn start(&self, request: StartRequest) -> Result<Option<FrameStream>, StreamError> {
        let mut slot = self.lock_slot();
        if slot.state != SessionState::Idle {
            log::info!(
                "StreamController: start ignored, session already {:?}",
                slot.state
            );
            return Ok(None);
        }

        let operation = self.selected_operation();
        let job = match self.prepare(operation, &request) {
            Ok(job) => job,
            Err(err) => {
                log::warn!("{}", err);
                return Err(err.into());
            }
        };

        let session = Arc::new(StreamSession::new(
            self.next_session_id.fetch_add(1, Ordering::SeqCst),
            operation,
            job.source.clone(),
        ));
        let buffer = Arc::new(FrameBuffer::new(self.settings.buffer_capacity));
        self.swap_buffer(buffer.clone());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker = spawn_capture(
            job,
            session.clone(),
            buffer.clone(),
            self.opener.clone(),
            ready_tx,
        )
        .map_err(StreamError::Spawn)?;

        slot.state = SessionState::Starting;
        slot.session = Some(session.clone());
        drop(slot);
        log::info!(
            "StreamController: session {} starting {} with {}",
            session.id(),
            session.source(),
            operation
        );

        match self.wait_ready(&ready_rx) {
            Ok(()) => {
                let mut slot = self.lock_slot();
                if !session.is_stop_requested() {
                    slot.state = SessionState::Running;
                    slot.worker = Some(worker);
                    log::info!("StreamController: session {} running", session.id());
                    return Ok(Some(FrameStream {
                        session,
                        buffer,
                        interval: self.settings.display_interval,
                    }));
                }
                drop(slot);
                log::info!(
                    "StreamController: session {} stopped while starting",
                    session.id()
                );
                let result = worker.join();
                self.reset_after_start_failure();
                result.and(Err(StreamError::Cancelled))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let result = worker.join();
                self.reset_after_start_failure();
                result.and(Err(StreamError::Cancelled))
            }
            Err(RecvTimeoutError::Timeout) => {
                let timeout = self.settings.ready_timeout.unwrap_or_default();
                session.request_stop();
                // A source stuck inside open cannot be joined; the thread exits
                // on its own once the open call returns and sees the stop flag.
                log::warn!(
                    "StreamController: {} produced no frame within {:?}, detaching capture thread",
                    session.source(),
                    timeout
                );
                drop(worker);
                self.reset_after_start_failure();
                Err(StreamError::ReadyTimeout(timeout))
            }
        }
    }

    /// Stop the running session.
    ///
    /// No-op when nothing is running. Stopping a session that is still starting
    /// only raises its stop flag; the pending `start` call cleans up.
    pub fn stop(&self) -> Option<CaptureSummary> {
        let mut slot = self.lock_slot();
        match slot.state {
            SessionState::Idle | SessionState::Stopping => return None,
            SessionState::Starting => {
                if let Some(session) = &slot.session {
                    session.request_stop();
                }
                return None;
            }
            SessionState::Running => {}
        }
        slot.state = SessionState::Stopping;
        let session = slot.session.take();
        let worker = slot.worker.take();
        drop(slot);

        if let Some(session) = &session {
            session.request_stop();
        }
        let summary = match worker.map(CaptureWorker::join) {
            Some(Ok(summary)) => Some(summary),
            Some(Err(err)) => {
                log::error!("StreamController: capture thread failed: {}", err);
                None
            }
            None => None,
        };
        let drained = self.buffer().drain();
        self.lock_slot().state = SessionState::Idle;

        log::info!(
            "StreamController: session {} stopped, {} buffered frames discarded",
            session.map(|session| session.id()).unwrap_or_default(),
            drained
        );
        summary
    }

    fn prepare(
        &self,
        operation: AugmentationOp,
        request: &StartRequest,
    ) -> Result<CaptureJob, ValidationError> {
        let source = resolve_source(request.selection, &request.inputs, &self.camera_address)?;
        let overlay_text = if operation.requires_overlay_text() {
            Some(require_text(
                request.overlay_text.as_deref(),
                operation.label(),
            )?)
        } else {
            None
        };
        Ok(CaptureJob {
            source,
            params: self.params,
            operation,
            overlay_text,
        })
    }

    fn wait_ready(&self, ready: &Receiver<()>) -> Result<(), RecvTimeoutError> {
        match self.settings.ready_timeout {
            Some(timeout) => ready.recv_timeout(timeout),
            None => ready
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        }
    }

    fn reset_after_start_failure(&self) {
        // The worker may still be running; leave it the old buffer.
        let stale = self.swap_buffer(Arc::new(FrameBuffer::new(self.settings.buffer_capacity)));
        let drained = stale.drain();
        if drained > 0 {
            log::debug!("StreamController: discarded {} frames after failed start", drained);
        }
        let mut slot = self.lock_slot();
        slot.state = SessionState::Idle;
        slot.session = None;
        slot.worker = None;
    }

    /// Install `buffer` as the current one and return the previous buffer.
    fn swap_buffer(&self, buffer: Arc<FrameBuffer>) -> Arc<FrameBuffer> {
        std::mem::replace(&mut *self.lock_buffer(), buffer)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, Arc<FrameBuffer>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if self.stop().is_some() {
            log::debug!("StreamController: stopped running session on drop");
        }
    }
}

/// Paced sequence of frames for the display layer.
///
/// Each call to `next` sleeps for the display interval and then polls the
/// buffer once, skipping empty polls. The stream ends when the session's stop
/// flag is raised, or when capture has finished and the buffer is empty.
#[derive(Debug)]
pub struct FrameStream {
    session: Arc<StreamSession>,
    buffer: Arc<FrameBuffer>,
    interval: Duration,
}

impl FrameStream {
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }
}

impl Iterator for FrameStream {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            if self.session.is_stop_requested() {
                return None;
            }
            std::thread::sleep(self.interval);
            if self.session.is_stop_requested() {
                return None;
            }
            if let Some(frame) = self.buffer.try_pop() {
                return Some(frame);
            }
            if self.session.is_capture_finished() && self.buffer.is_empty() {
                log::info!(
                    "FrameStream: session {} source exhausted",
                    self.session.id()
                );
                return None;
            }
        }
    }
}

/// A running session plus its buffer, for consumers outside the display loop.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session: Arc<StreamSession>,
    buffer: Arc<FrameBuffer>,
}

impl SessionHandle {
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Block until a frame is available, checking for session end every `slice`.
    ///
    /// Returns `None` if the session is stopped, or capture finished with
    /// nothing left to take.
    pub fn wait_for_frame(&self, slice: Duration) -> Option<Frame> {
        loop {
            if self.session.is_stop_requested() {
                return None;
            }
            if let Some(frame) = self.buffer.pop_timeout(slice) {
                return Some(frame);
            }
            if self.session.is_capture_finished() && self.buffer.is_empty() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> StreamController {
        let mut config = AppConfig {
            camera_address: "stub://cam?fps=200".to_string(),
            ..AppConfig::default()
        };
        config.stream.display_interval = Duration::from_millis(1);
        StreamController::new(&config)
    }

    #[test]
    fn start_then_stop_returns_to_idle_with_empty_buffer() -> Result<(), StreamError> {
        let controller = controller();
        let mut stream = controller
            .start(StartRequest::default())?
            .expect("new session");
        assert_eq!(controller.state(), SessionState::Running);
        assert!(stream.next().is_some());

        let summary = controller.stop().expect("capture summary");
        assert!(summary.captured >= 1);
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.buffer().is_empty());
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn second_start_is_a_no_op() -> Result<(), StreamError> {
        let controller = controller();
        let first = controller.start(StartRequest::default())?;
        assert!(first.is_some());
        let session_id = controller.active_session().map(|s| s.id());

        let second = controller.start(StartRequest {
            selection: SourceSelection::File,
            ..StartRequest::default()
        })?;
        assert!(second.is_none());
        assert_eq!(controller.active_session().map(|s| s.id()), session_id);
        controller.stop();
        Ok(())
    }

    #[test]
    fn overlay_text_is_required_for_text_overlay() {
        let controller = controller();
        controller.select_operation(AugmentationOp::TextOverlay);
        let err = controller
            .start(StartRequest {
                overlay_text: Some("   ".to_string()),
                ..StartRequest::default()
            })
            .expect_err("empty overlay text");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Text Overlay cannot be an empty string!");
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn stop_without_session_is_a_no_op() {
        let controller = controller();
        assert!(controller.stop().is_none());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn operation_is_fixed_for_the_running_session() -> Result<(), StreamError> {
        let controller = controller();
        controller.select_operation(AugmentationOp::Grayscale);
        let _stream = controller.start(StartRequest::default())?;
        controller.select_operation(AugmentationOp::RemoteQuery);
        assert_eq!(controller.current_operation(), AugmentationOp::Grayscale);
        controller.stop();
        assert_eq!(controller.current_operation(), AugmentationOp::RemoteQuery);
        Ok(())
    }
}
