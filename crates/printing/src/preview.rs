//! Raster previews of recorded pages.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageBuffer, ImageEncoder, Rgba};
use thiserror::Error;

use crate::display::{Color, DisplayCommand, RecordedPage, Stroke};

const MIN_ZOOM_PERCENT: u32 = 1;
const MAX_ZOOM_PERCENT: u32 = 400;
/// 128 Mpx, about 512 MiB of RGBA.
const MAX_PREVIEW_PIXELS: u64 = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("zoom {0}% is outside 1..=400")]
    Zoom(u32),
    #[error("page has an empty drawable extent")]
    EmptyPage,
    #[error("preview of {width} x {height} px exceeds the pixel budget")]
    TooLarge { width: u32, height: u32 },
    #[error("failed to encode preview: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encoded preview bitmap.
#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub width_px: u32,
    pub height_px: u32,
    pub zoom_percent: u32,
    pub data: Vec<u8>,
}

type Canvas = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Rasterizes `page` at `zoom_percent` of its device resolution into a PNG.
pub fn render_preview_png(page: &RecordedPage, zoom_percent: u32) -> Result<PreviewEntry, PreviewError> {
    if !(MIN_ZOOM_PERCENT..=MAX_ZOOM_PERCENT).contains(&zoom_percent) {
        return Err(PreviewError::Zoom(zoom_percent));
    }
    if page.extent.width <= 0 || page.extent.height <= 0 {
        return Err(PreviewError::EmptyPage);
    }
    let scale = zoom_percent as f32 / 100.0;
    let width_px = (page.extent.width as f32 * scale).ceil().max(1.0) as u32;
    let height_px = (page.extent.height as f32 * scale).ceil().max(1.0) as u32;
    if u64::from(width_px) * u64::from(height_px) > MAX_PREVIEW_PIXELS {
        return Err(PreviewError::TooLarge {
            width: width_px,
            height: height_px,
        });
    }

    let mut canvas = Canvas::from_pixel(width_px, height_px, Rgba([255, 255, 255, 255]));

    for command in &page.display_list.commands {
        match command {
            DisplayCommand::FilledRect(rect) => {
                let x = (rect.origin.x * scale).round() as i32;
                let y = (rect.origin.y * scale).round() as i32;
                let w = (rect.size.width * scale).ceil() as i32;
                let h = (rect.size.height * scale).ceil() as i32;
                fill_rect(&mut canvas, x, y, w, h, rect.color);
            }
            DisplayCommand::GlyphRun(run) => {
                // Glyph boxes only; the preview does not rasterize fonts.
                let advance = run.height_px * 0.5 * run.text.chars().count() as f32;
                let x = (run.position.x * scale).round() as i32;
                let y = (run.position.y * scale).round() as i32;
                let w = (advance * scale).ceil() as i32;
                let h = (run.height_px * scale).ceil() as i32;
                fill_rect(&mut canvas, x, y, w.max(1), h.max(1), run.color);
            }
            DisplayCommand::Line { start, end, stroke } => {
                draw_line(
                    &mut canvas,
                    (start.x * scale, start.y * scale),
                    (end.x * scale, end.y * scale),
                    stroke,
                    scale,
                );
            }
        }
    }

    let mut data = Vec::new();
    PngEncoder::new(&mut data).write_image(canvas.as_raw(), width_px, height_px, ColorType::Rgba8)?;

    Ok(PreviewEntry {
        width_px,
        height_px,
        zoom_percent,
        data,
    })
}

fn fill_rect(canvas: &mut Canvas, x: i32, y: i32, width: i32, height: i32, color: Color) {
    if width <= 0 || height <= 0 {
        return;
    }
    let width_px = canvas.width() as i32;
    let height_px = canvas.height() as i32;
    let x0 = x.clamp(0, width_px);
    let y0 = y.clamp(0, height_px);
    let x1 = (x + width).clamp(0, width_px);
    let y1 = (y + height).clamp(0, height_px);
    let rgba = color_to_rgba(color);
    for yy in y0..y1 {
        for xx in x0..x1 {
            canvas.put_pixel(xx as u32, yy as u32, rgba);
        }
    }
}

fn draw_line(canvas: &mut Canvas, start: (f32, f32), end: (f32, f32), stroke: &Stroke, scale: f32) {
    let thickness = (stroke.width * scale).round().max(1.0) as i32;
    let dx = end.0 - start.0;
    let dy = end.1 - start.1;
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i32;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = (start.0 + dx * t).round() as i32;
        let y = (start.1 + dy * t).round() as i32;
        fill_rect(canvas, x, y, thickness, thickness, stroke.color);
    }
}

fn color_to_rgba(color: Color) -> Rgba<u8> {
    let to_byte = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([
        to_byte(color.r),
        to_byte(color.g),
        to_byte(color.b),
        to_byte(color.a),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Point, PrintDisplayList, Rectangle, Size};
    use crate::units::{LogicalUnit, PixelSize};

    fn page(commands: Vec<DisplayCommand>) -> RecordedPage {
        RecordedPage {
            handle: None,
            unit: LogicalUnit::DeviceNative,
            extent: PixelSize {
                width: 200,
                height: 100,
            },
            display_list: PrintDisplayList { commands },
        }
    }

    #[test]
    fn preview_scales_extent_and_encodes_png() {
        let rect = DisplayCommand::FilledRect(Rectangle {
            origin: Point { x: 10.0, y: 10.0 },
            size: Size {
                width: 50.0,
                height: 20.0,
            },
            color: Color::BLACK,
        });
        let entry = render_preview_png(&page(vec![rect]), 50).unwrap();
        assert_eq!((entry.width_px, entry.height_px), (100, 50));
        assert_eq!(&entry.data[1..4], b"PNG");

        let decoded = image::load_from_memory(&entry.data).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(10, 7), &Rgba([0, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(2, 2), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn zoom_out_of_range_is_rejected() {
        assert!(matches!(
            render_preview_png(&page(Vec::new()), 0),
            Err(PreviewError::Zoom(0))
        ));
    }

    #[test]
    fn oversized_canvas_is_refused_before_allocation() {
        // A3 at 600 dpi.
        let mut sheet = page(Vec::new());
        sheet.extent = PixelSize {
            width: 7016,
            height: 9921,
        };
        assert!(matches!(
            render_preview_png(&sheet, 400),
            Err(PreviewError::TooLarge {
                width: 28064,
                height: 39684
            })
        ));
        assert!(matches!(
            render_preview_png(&sheet, 200),
            Err(PreviewError::TooLarge { .. })
        ));
    }
}
