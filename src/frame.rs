//! Decoded frames and the bounded buffer that hands them from capture to display.
//!
//! - `Frame`: owned raster (RGB or single-channel). Moved, never shared.
//! - `FrameBuffer`: bounded FIFO between the capture worker and its consumers.
//!
//! A `Frame` is produced by the capture worker, moved into the `FrameBuffer`, and
//! then owned by exactly one consumer: the display stream or the query dispatcher.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, RgbImage};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default frame buffer capacity. Small on purpose: display latency stays low
/// and a stalled consumer costs at most this many frames of memory.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5;

/// Default capture geometry requested from every source.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_TARGET_FPS: u32 = 10;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Channel layout of a frame's pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Interleaved 8-bit RGB, the display channel order.
    Rgb8,
    /// Single 8-bit luma channel (output of the grayscale transform).
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// In-memory raster captured from a video source.
///
/// There is no `Clone` impl: a frame lives in exactly one place at a time.
/// The capture worker moves it into the buffer and a consumer moves it out.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    layout: PixelLayout,
    /// Position in the session's capture order, starting at 1.
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build an RGB frame, validating the buffer length against the geometry.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Rgb8, data)
    }

    /// Build a single-channel frame, validating the buffer length.
    pub fn from_gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Gray8, data)
    }

    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(layout.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                layout,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Swap the pixel payload, keeping capture metadata. Length is the caller's contract.
    pub(crate) fn replace_pixels(mut self, layout: PixelLayout, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            self.width as usize * self.height as usize * layout.channels()
        );
        self.layout = layout;
        self.data = data;
        self
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the worker produced this frame.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Copy the raster into an `image` buffer (used for JPEG encoding).
    pub fn to_image(&self) -> Result<DynamicImage> {
        let image = match self.layout {
            PixelLayout::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
            PixelLayout::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageLuma8),
        };
        image.ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    // Pixel content stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Result of offering a frame to the buffer.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Buffer was full; the offered frame was discarded.
    Dropped,
}

/// Bounded FIFO shared by one producer and up to two consumers.
///
/// Backpressure is drop-newest: a push into a full buffer discards the incoming
/// frame and leaves the queued frames untouched. No call blocks on a full or
/// empty buffer except `pop_timeout`, which waits at most the given duration.
/// The lock is held for a single queue operation and never across I/O.
#[derive(Debug)]
pub struct FrameBuffer {
    queue: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue `frame`, or drop it if the buffer is at capacity.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return PushOutcome::Dropped;
        }
        queue.push_back(frame);
        drop(queue);
        self.available.notify_one();
        PushOutcome::Queued
    }

    /// Remove and return the oldest frame, or `None` when empty.
    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Like `try_pop`, but waits up to `timeout` for a frame to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let queue = self.lock();
        let (mut queue, _) = self
            .available
            .wait_timeout_while(queue, timeout, |queue| queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    /// Discard every queued frame. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let mut queue = self.lock();
        let drained = queue.len();
        queue.clear();
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Every critical section is one queue operation, so a panic while holding
    // the lock cannot leave the queue half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn make_test_frame(tag: u8) -> Frame {
        Frame::from_rgb(2, 2, vec![tag; 12])
            .expect("2x2 rgb frame")
            .with_sequence(tag as u64)
    }

    #[test]
    fn frame_rejects_mismatched_length() {
        assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_err());
        assert!(Frame::from_gray(2, 2, vec![0; 12]).is_err());
        assert!(Frame::from_gray(2, 2, vec![0; 4]).is_ok());
    }

    #[test]
    fn frame_buffer_keeps_first_five_of_seven() {
        let buf = FrameBuffer::new(5);

        let outcomes: Vec<PushOutcome> = (1..=7).map(|i| buf.push(make_test_frame(i))).collect();

        assert_eq!(&outcomes[..5], &[PushOutcome::Queued; 5]);
        assert_eq!(&outcomes[5..], &[PushOutcome::Dropped; 2]);
        assert_eq!(buf.len(), 5);

        let order: Vec<u64> = std::iter::from_fn(|| buf.try_pop())
            .map(|f| f.sequence())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn full_buffer_leaves_contents_unchanged() {
        let buf = FrameBuffer::new(2);
        let _ = buf.push(make_test_frame(10));
        let _ = buf.push(make_test_frame(20));

        assert_eq!(buf.push(make_test_frame(30)), PushOutcome::Dropped);

        let first = buf.try_pop().expect("first frame");
        assert_eq!(first.sequence(), 10);
        assert_eq!(first.pixels(), &[10u8; 12]);
        assert_eq!(buf.try_pop().map(|f| f.sequence()), Some(20));
        assert!(buf.try_pop().is_none());
    }

    #[test]
    fn drain_empties_buffer() {
        let buf = FrameBuffer::new(5);
        for i in 0..3 {
            let _ = buf.push(make_test_frame(i));
        }
        assert_eq!(buf.drain(), 3);
        assert!(buf.is_empty());
        assert_eq!(buf.drain(), 0);
    }

    #[test]
    fn pop_timeout_returns_none_when_nothing_arrives() {
        let buf = FrameBuffer::new(1);
        assert!(buf.pop_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let buf = Arc::new(FrameBuffer::new(1));
        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let _ = buf.push(make_test_frame(7));
            })
        };
        let frame = buf.pop_timeout(Duration::from_secs(5));
        producer.join().expect("producer thread");
        assert_eq!(frame.map(|f| f.sequence()), Some(7));
    }

    #[test]
    fn capacity_never_exceeded_under_concurrent_push() {
        let buf = Arc::new(FrameBuffer::new(5));
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let buf = buf.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let _ = buf.push(make_test_frame(i));
                        assert!(buf.len() <= 5);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread");
        }
        assert_eq!(buf.len(), 5);
    }
}
