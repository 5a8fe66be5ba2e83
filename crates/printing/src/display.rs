use std::fmt;

use serde::Serialize;

use crate::spooler::SurfaceHandle;
use crate::surface::DrawingSurface;
use crate::units::{FontSize, LogicalMapping, LogicalUnit, PixelSize};

/// Commands recorded for one page, in device pixels.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrintDisplayList {
    pub commands: Vec<DisplayCommand>,
}

impl PrintDisplayList {
    /// Append a command to the display list.
    pub fn push(&mut self, command: DisplayCommand) {
        self.commands.push(command);
    }

    /// Returns true if the display list is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Low-level drawing commands captured by [`RecordingSurface`].
#[derive(Debug, Clone, Serialize)]
pub enum DisplayCommand {
    GlyphRun(GlyphRun),
    FilledRect(Rectangle),
    Line {
        start: Point,
        end: Point,
        stroke: Stroke,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GlyphRun {
    pub text: String,
    pub font_family: String,
    /// Em height in device pixels.
    pub height_px: f32,
    pub position: Point,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rectangle {
    pub origin: Point,
    pub size: Size,
    pub color: Color,
}

/// 2D size representation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// 2D coordinate.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// RGBA color stored in normalized floating-point form.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Stroke descriptor for simple line drawing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stroke {
    pub width: f32,
    pub color: Color,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rgba({:.3}, {:.3}, {:.3}, {:.3})",
            self.r, self.g, self.b, self.a
        )
    }
}

/// One page as seen by the recording consumer.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedPage {
    #[serde(skip)]
    pub handle: Option<SurfaceHandle>,
    pub unit: LogicalUnit,
    /// Drawable extent in device pixels.
    pub extent: PixelSize,
    pub display_list: PrintDisplayList,
}

/// Drawing consumer that keeps every command it is asked to draw.
///
/// Coordinates are given in the session's logical unit and stored in device
/// pixels relative to the printable-area corner.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pages: Vec<RecordedPage>,
    current: Option<RecordedPage>,
    mapping: Option<LogicalMapping>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages completed so far.
    pub fn pages(&self) -> &[RecordedPage] {
        &self.pages
    }

    pub fn into_pages(self) -> Vec<RecordedPage> {
        self.pages
    }

    pub fn is_attached(&self) -> bool {
        self.current.is_some()
    }

    fn record(&mut self, command: DisplayCommand) {
        if let Some(page) = self.current.as_mut() {
            page.display_list.push(command);
        }
    }

    fn point(&self, x: f64, y: f64) -> Option<Point> {
        let mapping = self.mapping.as_ref()?;
        let (px, py) = mapping.to_device(x, y);
        Some(Point {
            x: px as f32,
            y: py as f32,
        })
    }

    pub fn text(&mut self, x: f64, y: f64, text: &str, font_family: &str, size: FontSize) {
        let Some(mapping) = self.mapping else {
            return;
        };
        let Some(position) = self.point(x, y) else {
            return;
        };
        self.record(DisplayCommand::GlyphRun(GlyphRun {
            text: text.to_string(),
            font_family: font_family.to_string(),
            height_px: size.to_device(&mapping) as f32,
            position,
            color: Color::BLACK,
        }));
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Color) {
        let Some(mapping) = self.mapping else {
            return;
        };
        let Some(origin) = self.point(x, y) else {
            return;
        };
        self.record(DisplayCommand::FilledRect(Rectangle {
            origin,
            size: Size {
                width: mapping.length_to_device_x(width) as f32,
                height: mapping.length_to_device_y(height) as f32,
            },
            color,
        }));
    }

    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Color) {
        let Some(mapping) = self.mapping else {
            return;
        };
        let (Some(start), Some(end)) = (self.point(from.0, from.1), self.point(to.0, to.1)) else {
            return;
        };
        self.record(DisplayCommand::Line {
            start,
            end,
            stroke: Stroke {
                width: mapping.length_to_device_x(width).max(1.0) as f32,
                color,
            },
        });
    }

    /// Draws a frame around the drawable area, in the active unit.
    pub fn frame(&mut self, inset: f64, color: Color) {
        let Some(mapping) = self.mapping else {
            return;
        };
        let (width, height) = mapping.logical_extent();
        let (ox, oy) = mapping.to_logical(0.0, 0.0);
        let left = ox + inset;
        let top = oy + inset;
        let right = ox + width - inset;
        let bottom = oy + height - inset;
        self.line((left, top), (right, top), 1.0, color);
        self.line((right, top), (right, bottom), 1.0, color);
        self.line((right, bottom), (left, bottom), 1.0, color);
        self.line((left, bottom), (left, top), 1.0, color);
    }
}

impl DrawingSurface for RecordingSurface {
    fn attach(&mut self, handle: SurfaceHandle, mapping: &LogicalMapping) {
        self.mapping = Some(*mapping);
        self.current = Some(RecordedPage {
            handle: Some(handle),
            unit: mapping.unit,
            extent: mapping.extent,
            display_list: PrintDisplayList::default(),
        });
    }

    fn detach(&mut self) {
        self.mapping = None;
        if let Some(page) = self.current.take() {
            self.pages.push(page);
        }
    }

    fn mapping_changed(&mut self, mapping: &LogicalMapping) {
        self.mapping = Some(*mapping);
        if let Some(page) = self.current.as_mut() {
            page.unit = mapping.unit;
            page.extent = mapping.extent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Anchor, DeviceMetrics, PixelOffset, Resolution};

    fn metrics() -> DeviceMetrics {
        DeviceMetrics {
            dpi: Resolution::uniform(300),
            physical: PixelSize {
                width: 2550,
                height: 3300,
            },
            offset: PixelOffset { x: 75, y: 75 },
            printable: PixelSize {
                width: 2400,
                height: 3150,
            },
        }
    }

    #[test]
    fn commands_are_recorded_in_device_pixels() {
        let mapping = LogicalMapping::new(LogicalUnit::HundredthsInch, Anchor::PhysicalPage, &metrics());
        let mut surface = RecordingSurface::new();
        surface.attach(SurfaceHandle(1), &mapping);
        surface.fill_rect(100.0, 100.0, 50.0, 20.0, Color::BLACK);
        surface.text(25.0, 25.0, "hi", "Helvetica", FontSize::from_points(12.0));
        surface.detach();

        let page = &surface.pages()[0];
        assert_eq!(page.display_list.commands.len(), 2);
        match &page.display_list.commands[0] {
            DisplayCommand::FilledRect(rect) => {
                assert_eq!((rect.origin.x, rect.origin.y), (225.0, 225.0));
                assert_eq!((rect.size.width, rect.size.height), (150.0, 60.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
        match &page.display_list.commands[1] {
            DisplayCommand::GlyphRun(run) => {
                assert_eq!((run.position.x, run.position.y), (0.0, 0.0));
                assert!((run.height_px - 50.0).abs() < 1e-3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn drawing_while_detached_is_ignored() {
        let mut surface = RecordingSurface::new();
        surface.fill_rect(0.0, 0.0, 1.0, 1.0, Color::BLACK);
        assert!(surface.pages().is_empty());
        assert!(!surface.is_attached());
    }
}
