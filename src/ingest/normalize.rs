use anyhow::{anyhow, Result};

/// Pixel formats backends may deliver. Everything is normalised to RGB24.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawPixelFormat {
    Rgb24,
    /// Blue-green-red byte order, as most camera and decoder APIs emit it.
    Bgr24,
    Nv12,
}

impl RawPixelFormat {
    /// Expected buffer length for a `width` x `height` image.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            RawPixelFormat::Rgb24 | RawPixelFormat::Bgr24 => pixels.checked_mul(3),
            RawPixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        }
    }
}

/// Convert a raw image into interleaved RGB, the display channel order.
pub fn normalize_to_rgb(
    mut pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: RawPixelFormat,
) -> Result<Vec<u8>> {
    let expected = format
        .frame_len(width, height)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    match format {
        RawPixelFormat::Rgb24 => Ok(pixels),
        RawPixelFormat::Bgr24 => {
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(pixels)
        }
        RawPixelFormat::Nv12 => {
            if width % 2 != 0 || height % 2 != 0 {
                return Err(anyhow!("NV12 frame {}x{} has odd dimensions", width, height));
            }
            Ok(nv12_to_rgb(&pixels, width as usize, height as usize))
        }
    }
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgb() -> Result<()> {
        let bgr = vec![1, 2, 3, 10, 20, 30];
        let rgb = normalize_to_rgb(bgr, 2, 1, RawPixelFormat::Bgr24)?;
        assert_eq!(rgb, vec![3, 2, 1, 30, 20, 10]);
        Ok(())
    }

    #[test]
    fn nv12_mid_chroma_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(nv12, 2, 2, RawPixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let rgb = normalize_to_rgb(pixels.clone(), 1, 3, RawPixelFormat::Rgb24)?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(vec![1u8; 8], 1, 3, RawPixelFormat::Rgb24).is_err());
        Ok(())
    }
}
