//! Bitmap text burn-in for the text overlay operation.
//!
//! Glyphs come from a fixed 5x7 font. Each glyph bit is drawn as a square block
//! whose side grows with the style's scale and stroke thickness. Text is
//! anchored at the bottom-right corner and may run off the left or top edge;
//! blocks outside the frame are skipped, never clamped back in.

use crate::frame::{Frame, PixelLayout};

const GLYPH_COLUMNS: i64 = 5;
const GLYPH_ROWS: i64 = 7;
/// Horizontal advance per character in glyph bits (5 columns plus 1 gap).
const GLYPH_ADVANCE: i64 = 6;

/// Font and placement parameters for burned-in text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    pub scale: u32,
    pub thickness: u32,
    /// RGB color of the glyph strokes.
    pub color: [u8; 3],
    /// Gap between the text box and the right and bottom frame edges.
    pub padding: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            scale: 1,
            thickness: 2,
            color: [0, 255, 0],
            padding: 10,
        }
    }
}

impl OverlayStyle {
    /// Side length in pixels of one glyph bit.
    pub fn block_size(&self) -> i64 {
        (2 * self.scale as i64 + self.thickness as i64 / 2).max(1)
    }
}

/// Frame region covered by rendered text. Coordinates may be negative when
/// the text is larger than the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl TextBox {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Where `text` lands on a `frame_width` x `frame_height` frame.
pub fn text_box(text: &str, frame_width: u32, frame_height: u32, style: &OverlayStyle) -> TextBox {
    let block = style.block_size();
    let chars = text.chars().flat_map(char::to_uppercase).count() as i64;
    let width = if chars == 0 {
        0
    } else {
        (chars * GLYPH_ADVANCE - 1) * block
    };
    let height = GLYPH_ROWS * block;
    let baseline = frame_height as i64 - style.padding as i64;
    TextBox {
        x: frame_width as i64 - width - style.padding as i64,
        y: baseline - height,
        width,
        height,
    }
}

/// Burn `text` into the bottom-right corner of `frame`.
pub fn render_text(frame: &mut Frame, text: &str, style: &OverlayStyle) {
    let area = text_box(text, frame.width, frame.height, style);
    let block = style.block_size();
    let (width, height) = (frame.width as i64, frame.height as i64);
    let layout = frame.layout();
    let color = stroke_color(layout, style.color);
    let channels = layout.channels();
    let pixels = frame.pixels_mut();

    for (index, ch) in text.chars().flat_map(char::to_uppercase).enumerate() {
        let glyph = glyph_bits(ch).unwrap_or(UNKNOWN_GLYPH);
        let origin_x = area.x + index as i64 * GLYPH_ADVANCE * block;
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..GLYPH_COLUMNS {
                if (pattern >> (GLYPH_COLUMNS - 1 - col)) & 1 == 0 {
                    continue;
                }
                let left = origin_x + col * block;
                let top = area.y + row as i64 * block;
                for y in top.max(0)..(top + block).min(height) {
                    for x in left.max(0)..(left + block).min(width) {
                        let offset = (y * width + x) as usize * channels;
                        pixels[offset..offset + channels].copy_from_slice(&color[..channels]);
                    }
                }
            }
        }
    }
}

fn stroke_color(layout: PixelLayout, rgb: [u8; 3]) -> [u8; 3] {
    match layout {
        PixelLayout::Rgb8 => rgb,
        PixelLayout::Gray8 => {
            let luma =
                (2126 * rgb[0] as u32 + 7152 * rgb[1] as u32 + 722 * rgb[2] as u32) / 10_000;
            [luma as u8; 3]
        }
    }
}

const UNKNOWN_GLYPH: [u8; 7] = [
    0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100,
];

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'J' => Some([
            0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'Q' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'X' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100,
        ]),
        'Z' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '!' => Some([
            0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100,
        ]),
        '?' => Some(UNKNOWN_GLYPH),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ',' => Some([0, 0, 0, 0, 0b00110, 0b00100, 0b01000]),
        ':' => Some([0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0]),
        '\'' => Some([0b00100, 0b00100, 0b01000, 0, 0, 0, 0]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '_' => Some([0, 0, 0, 0, 0, 0, 0b11111]),
        '+' => Some([0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0]),
        '=' => Some([0, 0, 0b11111, 0, 0b11111, 0, 0]),
        '/' => Some([
            0b00001, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000,
        ]),
        '(' => Some([
            0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010,
        ]),
        ')' => Some([
            0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000,
        ]),
        '#' => Some([
            0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(width, height, vec![0; (width * height * 3) as usize]).expect("rgb frame")
    }

    #[test]
    fn hello_box_sits_in_bottom_right_corner() {
        let style = OverlayStyle::default();
        let area = text_box("hello", 640, 480, &style);
        assert_eq!(area.x + area.width, 640 - 10);
        assert_eq!(area.y + area.height, 480 - 10);
        assert!(area.x > 320 && area.y > 240);
    }

    #[test]
    fn hello_only_touches_its_text_box() {
        let style = OverlayStyle::default();
        let area = text_box("hello", 640, 480, &style);
        let mut frame = black_frame(640, 480);
        render_text(&mut frame, "hello", &style);

        let mut green = 0;
        for (index, px) in frame.pixels().chunks_exact(3).enumerate() {
            let (x, y) = ((index % 640) as i64, (index / 640) as i64);
            if area.contains(x, y) {
                if px == [0, 255, 0] {
                    green += 1;
                } else {
                    assert_eq!(px, [0, 0, 0]);
                }
            } else {
                assert_eq!(px, [0, 0, 0], "pixel ({x}, {y}) outside the text box changed");
            }
        }
        assert!(green > 0);
    }

    #[test]
    fn oversized_text_is_cut_off_without_panicking() {
        let style = OverlayStyle::default();
        let text = "THIS LINE IS FAR TOO LONG FOR A TINY FRAME";
        let area = text_box(text, 32, 12, &style);
        assert!(area.x < 0);
        assert!(area.y < 0);

        let mut frame = black_frame(32, 12);
        render_text(&mut frame, text, &style);
        assert_eq!(frame.pixels().len(), 32 * 12 * 3);
    }

    #[test]
    fn unknown_characters_render_as_placeholder() {
        let style = OverlayStyle::default();
        let mut known = black_frame(64, 48);
        let mut unknown = black_frame(64, 48);
        render_text(&mut known, "?", &style);
        render_text(&mut unknown, "\u{263a}", &style);
        assert_eq!(known.pixels(), unknown.pixels());
    }

    #[test]
    fn gray_frames_get_luma_strokes() {
        let style = OverlayStyle::default();
        let mut frame = Frame::from_gray(64, 48, vec![0; 64 * 48]).expect("gray frame");
        render_text(&mut frame, "I", &style);
        assert!(frame.pixels().iter().any(|&v| v > 0));
        assert!(frame.pixels().iter().all(|&v| v == 0 || v == 182));
    }
}
