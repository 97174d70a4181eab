//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), requests the capture geometry
//! and rate, and maps frames through an mmap stream. Dropping the source tears
//! down the stream before closing the device.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{CaptureParams, CapturedImage, FrameSource, RawPixelFormat};

pub(crate) struct V4l2Source {
    device_path: String,
    params: CaptureParams,
    state: Option<V4l2State>,
    format: RawPixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn new(device_path: &str, params: CaptureParams) -> Self {
        Self {
            device_path: device_path.to_string(),
            params,
            state: None,
            format: RawPixelFormat::Rgb24,
            frame_count: 0,
            active_width: params.width,
            active_height: params.height,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.params.width;
        format.height = self.params.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = match &format.fourcc.repr {
            b"RGB3" => RawPixelFormat::Rgb24,
            b"BGR3" => RawPixelFormat::Bgr24,
            b"NV12" => RawPixelFormat::Nv12,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} negotiated unsupported fourcc {}",
                    self.device_path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if self.params.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.params.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        use v4l::io::traits::CaptureStream;

        let expected = self
            .format
            .frame_len(self.active_width, self.active_height)
            .context("v4l2 frame dimensions overflow")?;
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            let frame = buf
                .get(..expected)
                .context("v4l2 buffer shorter than negotiated frame")?;
            Ok(frame.to_vec())
        })?;

        self.frame_count += 1;
        Ok(Some(CapturedImage {
            pixels,
            width: self.active_width,
            height: self.active_height,
            format: self.format,
        }))
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}
