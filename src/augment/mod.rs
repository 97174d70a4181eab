//! Per-frame augmentation operations.
//!
//! Every per-frame transform is a plain function of `(frame, text)`. The capture
//! worker looks the function up once per session with `transform_for` and calls
//! it on each frame before the frame enters the buffer. `RemoteQuery` has no
//! transform: frames pass through untouched and the query dispatcher consumes
//! them on demand instead.

mod overlay;

use std::fmt;
use std::str::FromStr;

use image::RgbImage;

use crate::frame::{Frame, PixelLayout};

pub use overlay::{render_text, text_box, OverlayStyle, TextBox};

/// A pure frame transform. The text argument is only read by `TextOverlay`.
pub type Transform = fn(Frame, Option<&str>) -> Frame;

/// Augmentation selected for a stream session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AugmentationOp {
    #[default]
    None,
    Grayscale,
    TextOverlay,
    /// Frames are left unmodified and become available to remote queries.
    RemoteQuery,
}

impl AugmentationOp {
    pub const ALL: [AugmentationOp; 4] = [
        AugmentationOp::None,
        AugmentationOp::Grayscale,
        AugmentationOp::TextOverlay,
        AugmentationOp::RemoteQuery,
    ];

    /// Display label, also used as the field name in validation warnings.
    pub fn label(self) -> &'static str {
        match self {
            AugmentationOp::None => "None",
            AugmentationOp::Grayscale => "Grayscale",
            AugmentationOp::TextOverlay => "Text Overlay",
            AugmentationOp::RemoteQuery => "Llava Query",
        }
    }

    pub fn requires_overlay_text(self) -> bool {
        self == AugmentationOp::TextOverlay
    }
}

impl fmt::Display for AugmentationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AugmentationOp {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "none" => Ok(AugmentationOp::None),
            "grayscale" | "greyscale" | "gray" => Ok(AugmentationOp::Grayscale),
            "text-overlay" | "text" => Ok(AugmentationOp::TextOverlay),
            "remote-query" | "llava-query" | "query" => Ok(AugmentationOp::RemoteQuery),
            _ => Err(format!(
                "unknown operation '{}'; expected none, grayscale, text-overlay or remote-query",
                value.trim()
            )),
        }
    }
}

/// Transform registered for `op`, or `None` when the op has no per-frame work.
pub fn transform_for(op: AugmentationOp) -> Option<Transform> {
    match op {
        AugmentationOp::None => Some(identity),
        AugmentationOp::Grayscale => Some(grayscale),
        AugmentationOp::TextOverlay => Some(text_overlay),
        AugmentationOp::RemoteQuery => None,
    }
}

/// Apply `op` to a single frame.
pub fn apply(op: AugmentationOp, frame: Frame, text: Option<&str>) -> Frame {
    match transform_for(op) {
        Some(transform) => transform(frame, text),
        None => frame,
    }
}

fn identity(frame: Frame, _text: Option<&str>) -> Frame {
    frame
}

fn grayscale(frame: Frame, _text: Option<&str>) -> Frame {
    if frame.layout() == PixelLayout::Gray8 {
        return frame;
    }
    let Some(rgb) = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec()) else {
        log::warn!("grayscale: {:?} does not match its geometry", frame);
        return frame;
    };
    let luma = image::imageops::grayscale(&rgb).into_raw();
    frame.replace_pixels(PixelLayout::Gray8, luma)
}

fn text_overlay(mut frame: Frame, text: Option<&str>) -> Frame {
    if let Some(text) = text.filter(|text| !text.is_empty()) {
        render_text(&mut frame, text, &OverlayStyle::default());
    }
    frame
}
