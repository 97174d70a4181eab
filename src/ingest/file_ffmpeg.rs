//! Local video file source using FFmpeg.
//!
//! Decodes the best video track, scales every frame to the requested capture
//! geometry in RGB24, and paces delivery to the requested rate so a file plays
//! back at roughly camera speed instead of draining in a burst.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::synthetic::frame_interval;
use super::{CaptureParams, CapturedImage, FrameSource, RawPixelFormat};

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    params: CaptureParams,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &Path, params: CaptureParams) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}'", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            params.width,
            params.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_path_buf(),
            params,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            last_frame_at: None,
            eof_sent: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: opened {} (ffmpeg)", self.path.display());
        Ok(())
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.params.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn receive_scaled(&mut self) -> Result<Option<CapturedImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Ok(Some(CapturedImage {
            pixels,
            width,
            height,
            format: RawPixelFormat::Rgb24,
        }))
    }
}

impl FrameSource for FfmpegFileSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        loop {
            if let Some(image) = self.receive_scaled()? {
                self.pace();
                self.frame_count += 1;
                return Ok(Some(image));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut sent = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                sent = true;
                break;
            }
            if !sent {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }
}

impl Drop for FfmpegFileSource {
    fn drop(&mut self) {
        log::info!(
            "FileSource: released {} after {} frames",
            self.path.display(),
            self.frame_count
        );
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data.get(..len).context("ffmpeg frame is truncated")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
