//! Grid composition: lays collected cell images out as a labeled XY plot.
//!
//! Row `i` holds the `i`-th y value and column `j` the `j`-th x value. A
//! cell is filled with the result whose label equals the composite label of
//! its two values; cells with no matching result stay blank. Labels are
//! drawn into the top and left margins, cell values in the inner half and
//! axis titles in the outer half.

use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::axis::{composite_label, label_collisions, AxisValue};
use crate::error::{Result, XyPlotError};
use crate::font::LabelFont;
use crate::types::CellResult;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Layout and labeling options for a composed plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStyle {
    /// Cell width in pixels. The height follows from the first image's
    /// aspect ratio.
    pub cell_size: u32,
    pub font_size: f32,
    /// Width of the left margin and height of the top margin.
    pub margin_size: u32,
    pub show_cell_labels: bool,
    pub show_axis_labels: bool,
    pub font_path: PathBuf,
    /// Output encoding used by [`GridCompositor::compose_and_save`].
    #[serde(skip, default = "default_format")]
    pub format: ImageFormat,
}

fn default_format() -> ImageFormat {
    ImageFormat::Png
}

impl Default for GridStyle {
    fn default() -> Self {
        Self {
            cell_size: 512,
            font_size: 16.0,
            margin_size: 100,
            show_cell_labels: true,
            show_axis_labels: true,
            font_path: PathBuf::from("static/Roboto-Regular.ttf"),
            format: default_format(),
        }
    }
}

impl GridStyle {
    pub fn cell_size(mut self, size: u32) -> Self {
        self.cell_size = size;
        self
    }

    pub fn font_size(mut self, size: f32) -> Self {
        self.font_size = size;
        self
    }

    pub fn margin_size(mut self, size: u32) -> Self {
        self.margin_size = size;
        self
    }

    pub fn cell_labels(mut self, show: bool) -> Self {
        self.show_cell_labels = show;
        self
    }

    pub fn axis_labels(mut self, show: bool) -> Self {
        self.show_axis_labels = show;
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = path.into();
        self
    }

    pub fn format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    fn any_labels(&self) -> bool {
        self.show_cell_labels || self.show_axis_labels
    }
}

/// Pixel geometry of a composed plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub left_margin: u32,
    pub top_margin: u32,
    pub width: u32,
    pub height: u32,
}

impl GridLayout {
    /// Cell height is `cell_size / (first width / first height)`, rounded
    /// down and never below one pixel. Margins are zero when labels are off.
    ///
    /// Fails with `Validation` if the canvas would not fit in `u32` pixels.
    pub fn compute(
        first: &DynamicImage,
        columns: u32,
        rows: u32,
        style: &GridStyle,
    ) -> Result<Self> {
        let too_large = || {
            XyPlotError::Validation(format!(
                "A {}x{} grid of {}px cells is too large to compose",
                columns, rows, style.cell_size
            ))
        };

        let cell_width = style.cell_size.max(1);
        let scaled = cell_width as u64 * first.height() as u64 / first.width().max(1) as u64;
        let cell_height = u32::try_from(scaled).map_err(|_| too_large())?.max(1);
        let margin = if style.any_labels() {
            style.margin_size
        } else {
            0
        };
        let width = columns
            .checked_mul(cell_width)
            .and_then(|w| w.checked_add(margin))
            .ok_or_else(|| too_large())?;
        let height = rows
            .checked_mul(cell_height)
            .and_then(|h| h.checked_add(margin))
            .ok_or_else(|| too_large())?;

        Ok(Self {
            columns,
            rows,
            cell_width,
            cell_height,
            left_margin: margin,
            top_margin: margin,
            width,
            height,
        })
    }

    /// Top-left corner of the cell at `row`, `col`.
    pub fn cell_origin(&self, row: u32, col: u32) -> (u32, u32) {
        (
            self.left_margin + col * self.cell_width,
            self.top_margin + row * self.cell_height,
        )
    }
}

/// A composed plot and where it was written.
#[derive(Debug, Clone)]
pub struct ComposedPlot {
    pub image: RgbImage,
    pub path: PathBuf,
}

/// Builds the labeled grid image from a sweep's results.
#[derive(Debug)]
pub struct GridCompositor {
    style: GridStyle,
    font: LabelFont,
}

impl GridCompositor {
    /// Load the style's font, falling back to built-in glyphs.
    pub fn new(style: GridStyle) -> Self {
        let font = LabelFont::load(&style.font_path, style.font_size);
        Self { style, font }
    }

    pub fn with_font(style: GridStyle, font: LabelFont) -> Self {
        Self { style, font }
    }

    pub fn style(&self) -> &GridStyle {
        &self.style
    }

    pub fn font(&self) -> &LabelFont {
        &self.font
    }

    /// Compose the grid. Deterministic: the same inputs give the same pixels.
    pub fn compose(
        &self,
        results: &[CellResult],
        x_values: &[AxisValue],
        y_values: &[AxisValue],
        x_label: &str,
        y_label: &str,
    ) -> Result<RgbImage> {
        let first = results.first().ok_or(XyPlotError::EmptySweepResult)?;
        if x_values.is_empty() || y_values.is_empty() {
            return Err(XyPlotError::Validation(
                "Cannot compose a grid with an empty axis".into(),
            ));
        }

        for (label, points) in label_collisions(x_values, y_values) {
            tracing::warn!(
                label = %label,
                cells = points.len(),
                "Composite label shared by several cells; they will show the same image"
            );
        }

        let layout = GridLayout::compute(
            &first.image,
            x_values.len() as u32,
            y_values.len() as u32,
            &self.style,
        )?;
        let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, BACKGROUND);

        for (row, y_value) in y_values.iter().enumerate() {
            for (col, x_value) in x_values.iter().enumerate() {
                let label = composite_label(x_value, y_value);
                let Some(result) = results.iter().find(|r| r.label == label) else {
                    tracing::debug!(label = %label, "No image for cell, leaving blank");
                    continue;
                };
                let cell = result
                    .image
                    .resize_exact(layout.cell_width, layout.cell_height, FilterType::Lanczos3)
                    .to_rgba8();
                let (x, y) = layout.cell_origin(row as u32, col as u32);
                imageops::replace(&mut canvas, &cell, x as i64, y as i64);
            }
        }

        self.draw_labels(&mut canvas, &layout, x_values, y_values, x_label, y_label);
        Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
    }

    /// Compose the grid and write it to `output_dir` under a timestamped name.
    pub fn compose_and_save(
        &self,
        results: &[CellResult],
        x_values: &[AxisValue],
        y_values: &[AxisValue],
        x_label: &str,
        y_label: &str,
        output_dir: &Path,
    ) -> Result<ComposedPlot> {
        let image = self.compose(results, x_values, y_values, x_label, y_label)?;
        let path = save_plot(&image, output_dir, self.style.format)?;
        tracing::info!(path = %path.display(), width = image.width(), height = image.height(), "Saved XY plot");
        Ok(ComposedPlot { image, path })
    }

    fn draw_labels(
        &self,
        canvas: &mut RgbaImage,
        layout: &GridLayout,
        x_values: &[AxisValue],
        y_values: &[AxisValue],
        x_label: &str,
        y_label: &str,
    ) {
        let style = &self.style;
        let both = style.show_cell_labels && style.show_axis_labels;
        // Distance from the grid edge to the center of each label band.
        let (value_band, title_band) = if both {
            (layout.top_margin / 4, layout.top_margin * 3 / 4)
        } else {
            (layout.top_margin / 2, layout.top_margin / 2)
        };
        let grid_width = layout.columns * layout.cell_width;
        let grid_height = layout.rows * layout.cell_height;

        if style.show_cell_labels {
            for (col, value) in x_values.iter().enumerate() {
                let tile = self.font.render(&value.to_string(), TEXT_COLOR);
                let (x, _) = layout.cell_origin(0, col as u32);
                let cx = x + layout.cell_width / 2;
                let cy = layout.top_margin.saturating_sub(value_band);
                overlay_centered(canvas, &tile, cx, cy);
            }
            for (row, value) in y_values.iter().enumerate() {
                let tile = imageops::rotate270(&self.font.render(&value.to_string(), TEXT_COLOR));
                let (_, y) = layout.cell_origin(row as u32, 0);
                let cx = layout.left_margin.saturating_sub(value_band);
                let cy = y + layout.cell_height / 2;
                overlay_centered(canvas, &tile, cx, cy);
            }
        }

        if style.show_axis_labels {
            let tile = self.font.render(x_label, TEXT_COLOR);
            let cx = layout.left_margin + grid_width / 2;
            let cy = layout.top_margin.saturating_sub(title_band);
            overlay_centered(canvas, &tile, cx, cy);

            let tile = imageops::rotate270(&self.font.render(y_label, TEXT_COLOR));
            let cx = layout.left_margin.saturating_sub(title_band);
            let cy = layout.top_margin + grid_height / 2;
            overlay_centered(canvas, &tile, cx, cy);
        }
    }
}

/// Alpha-blend `tile` so its center lands on (`cx`, `cy`). Clipped at the
/// canvas edges.
fn overlay_centered(canvas: &mut RgbaImage, tile: &RgbaImage, cx: u32, cy: u32) {
    let x = cx as i64 - tile.width() as i64 / 2;
    let y = cy as i64 - tile.height() as i64 / 2;
    imageops::overlay(canvas, tile, x, y);
}

/// `xy_plot_<YYYYMMDD>_<HHMMSS>.<ext>`
pub fn plot_filename(now: DateTime<Local>, format: ImageFormat) -> String {
    let ext = format.extensions_str().first().copied().unwrap_or("png");
    format!("xy_plot_{}.{}", now.format("%Y%m%d_%H%M%S"), ext)
}

/// Write `image` into `output_dir`, creating the directory if needed.
pub fn save_plot(image: &RgbImage, output_dir: &Path, format: ImageFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(plot_filename(Local::now(), format));
    image.save_with_format(&path, format)?;
    Ok(path)
}
