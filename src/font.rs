//! Label text rendering for the grid compositor.
//!
//! Labels are rendered into small transparent tiles which the compositor
//! rotates and overlays onto the canvas.

use ab_glyph::{FontVec, PxScale};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;

/// Pixel scale applied to the 8x8 built-in glyphs (16px text).
pub const BUILTIN_GLYPH_SCALE: u32 = 2;

/// Font used for cell values and axis titles.
pub enum LabelFont {
    /// A TrueType/OpenType font at the requested pixel size.
    TrueType { font: FontVec, scale: PxScale },
    /// Built-in 8x8 bitmap glyphs at a fixed size.
    Builtin,
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelFont::TrueType { scale, .. } => f
                .debug_struct("TrueType")
                .field("scale", &scale.y)
                .finish(),
            LabelFont::Builtin => f.write_str("Builtin"),
        }
    }
}

impl LabelFont {
    /// Load a font file at `size` px, falling back to the built-in glyphs
    /// if the file is missing or unparsable.
    pub fn load(path: &Path, size: f32) -> Self {
        let loaded = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match loaded {
            Ok(font) => LabelFont::TrueType {
                font,
                scale: PxScale::from(size),
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Label font unavailable, using built-in glyphs");
                LabelFont::Builtin
            }
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, LabelFont::Builtin)
    }

    /// Render `text` onto a tight transparent tile.
    pub fn render(&self, text: &str, color: Rgba<u8>) -> RgbaImage {
        match self {
            LabelFont::TrueType { font, scale } => {
                let (w, h) = text_size(*scale, font, text);
                let mut tile = RgbaImage::new(w.max(1), h.max(1));
                draw_text_mut(&mut tile, color, 0, 0, *scale, font, text);
                tile
            }
            LabelFont::Builtin => render_builtin(text, color),
        }
    }
}

fn render_builtin(text: &str, color: Rgba<u8>) -> RgbaImage {
    let s = BUILTIN_GLYPH_SCALE;
    let glyph_px = 8 * s;
    let chars: Vec<char> = text.chars().collect();
    let mut tile = RgbaImage::new((chars.len() as u32 * glyph_px).max(1), glyph_px);

    for (i, c) in chars.iter().enumerate() {
        let glyph = BASIC_FONTS
            .get(*c)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = i as u32 * glyph_px;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1u8 << col) == 0 {
                    continue;
                }
                for dy in 0..s {
                    for dx in 0..s {
                        tile.put_pixel(origin_x + col * s + dx, row as u32 * s + dy, color);
                    }
                }
            }
        }
    }
    tile
}
