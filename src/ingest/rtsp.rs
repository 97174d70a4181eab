//! RTSP stream source using GStreamer.
//!
//! Pipeline: rtspsrc ! decodebin ! videoconvert ! videoscale ! videorate ! appsink,
//! with caps pinned to RGB at the requested geometry and rate. The appsink keeps
//! a single buffer and drops stale ones so a slow reader always sees fresh video.

use anyhow::{Context, Result};
use std::time::Instant;

use super::{CaptureParams, CapturedImage, FrameSource, RawPixelFormat};

pub(crate) struct GstreamerRtspSource {
    url: String,
    params: CaptureParams,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    connected_at: Option<Instant>,
}

impl GstreamerRtspSource {
    pub(crate) fn new(url: &str, params: CaptureParams) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! videoscale ! videorate ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", params.width as i32)
            .field("height", params.height as i32)
            .field(
                "framerate",
                gstreamer::Fraction::new(params.target_fps.max(1) as i32, 1),
            )
            .build();
        appsink.set_caps(Some(&caps));

        Ok(Self {
            url: url.to_string(),
            params,
            pipeline,
            appsink,
            frame_count: 0,
            connected_at: None,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", self.url);
        Ok(())
    }

    /// How long one pull may block before the stream counts as stalled.
    fn frame_timeout(&self) -> gstreamer::ClockTime {
        let base_ms = if self.params.target_fps == 0 {
            500
        } else {
            (1000 / self.params.target_fps).saturating_mul(4)
        };
        gstreamer::ClockTime::from_mseconds(base_ms.max(500) as u64)
    }
}

impl FrameSource for GstreamerRtspSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        let Some(sample) = self.appsink.try_pull_sample(self.frame_timeout()) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            anyhow::bail!("RTSP stream {} stalled", self.url);
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Ok(Some(CapturedImage {
            pixels,
            width,
            height,
            format: RawPixelFormat::Rgb24,
        }))
    }
}

impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop pipeline for {}: {}", self.url, err);
        }
        log::info!(
            "RtspSource: released {} after {} frames ({:?} connected)",
            self.url,
            self.frame_count,
            self.connected_at.map(|at| at.elapsed())
        );
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
