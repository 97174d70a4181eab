//! Synthetic (`stub://`) frame source.
//!
//! Stands in for a camera, file or RTSP stream in tests and demos. Behaviour is
//! tuned through query parameters on the location:
//!
//! - `frames=N`: end of stream after N images (default: endless)
//! - `fps=N`: delivery rate (default: the requested capture rate)
//! - `format=bgr|rgb|nv12`: raw pixel format (default: bgr, like real cameras)
//! - `fail_open=1`: `connect` fails, as an absent device or bad URL would
//! - `fail_read_after=N`: the read after N images returns an error
//! - `open_delay_ms=N`: `connect` blocks this long before succeeding

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use super::{CaptureParams, CapturedImage, FrameSource, RawPixelFormat};

/// Synthetic frame source driven by its `stub://` location.
pub struct SyntheticSource {
    location: String,
    params: CaptureParams,
    max_frames: Option<u64>,
    fail_open: bool,
    fail_read_after: Option<u64>,
    open_delay: Duration,
    format: RawPixelFormat,
    interval: Duration,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    /// Simulated scene state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(location: &str, params: CaptureParams) -> Result<Self> {
        let url = Url::parse(location).with_context(|| format!("parse stub location {}", location))?;
        let mut source = Self {
            location: location.to_string(),
            params,
            max_frames: None,
            fail_open: false,
            fail_read_after: None,
            open_delay: Duration::ZERO,
            format: RawPixelFormat::Bgr24,
            interval: frame_interval(params.target_fps),
            frame_count: 0,
            last_frame_at: None,
            scene_state: 0,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => source.max_frames = Some(parse_number(&key, &value)?),
                "fps" => source.interval = frame_interval(parse_number(&key, &value)? as u32),
                "fail_open" => source.fail_open = value != "0",
                "fail_read_after" => source.fail_read_after = Some(parse_number(&key, &value)?),
                "open_delay_ms" => {
                    source.open_delay = Duration::from_millis(parse_number(&key, &value)?)
                }
                "format" => {
                    source.format = match value.as_ref() {
                        "rgb" => RawPixelFormat::Rgb24,
                        "bgr" => RawPixelFormat::Bgr24,
                        "nv12" => RawPixelFormat::Nv12,
                        other => return Err(anyhow!("unknown stub pixel format '{}'", other)),
                    }
                }
                other => log::debug!("SyntheticSource: ignoring parameter '{}'", other),
            }
        }
        Ok(source)
    }

    /// Synthetic sources connect instantly unless configured otherwise.
    pub fn connect(&mut self) -> Result<()> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.fail_open {
            return Err(anyhow!("{} refused to open (fail_open)", self.location));
        }
        log::info!("SyntheticSource: connected to {}", self.location);
        Ok(())
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let len = self
            .format
            .frame_len(self.params.width, self.params.height)
            .unwrap_or_default();

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        if self.max_frames.is_some_and(|max| self.frame_count >= max) {
            return Ok(None);
        }
        if self.fail_read_after.is_some_and(|n| self.frame_count >= n) {
            return Err(anyhow!("{} read failed (fail_read_after)", self.location));
        }
        self.pace();
        self.frame_count += 1;
        Ok(Some(CapturedImage {
            pixels: self.generate_pixels(),
            width: self.params.width,
            height: self.params.height,
            format: self.format,
        }))
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        log::debug!(
            "SyntheticSource: released {} after {} frames",
            self.location,
            self.frame_count
        );
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("stub parameter {}={} is not a number", key, value))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
