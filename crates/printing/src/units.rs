//! Physical geometry, device metrics and logical coordinate mapping.
//! 實體尺寸、裝置度量與邏輯座標對應。

use serde::{Deserialize, Serialize};

use crate::settings::Orientation;

/// Tenths of a millimetre in one inch.
pub const TENTHS_MM_PER_INCH: i32 = 254;

const POINTS_PER_INCH: f64 = 72.0;

/// Size expressed in tenths of a millimetre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SizeTenths {
    pub width: i32,
    pub height: i32,
}

impl SizeTenths {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub const fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub fn oriented(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Portrait => self,
            Orientation::Landscape => self.swapped(),
        }
    }
}

/// Non-printable margins in tenths of a millimetre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margins {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Margins {
    pub const fn uniform(value: i32) -> Self {
        Self {
            left: value,
            top: value,
            right: value,
            bottom: value,
        }
    }

    /// Transposes the margins across the page diagonal.
    pub const fn swapped(self) -> Self {
        Self {
            left: self.top,
            top: self.left,
            right: self.bottom,
            bottom: self.right,
        }
    }
}

/// Rectangle in tenths of a millimetre, origin at the physical page corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RectTenths {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Horizontal and vertical dots per inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub x: i32,
    pub y: i32,
}

impl Resolution {
    pub const fn uniform(dpi: i32) -> Self {
        Self { x: dpi, y: dpi }
    }

    pub const fn swapped(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
        }
    }
}

/// Size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: i32,
    pub height: i32,
}

/// Offset in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelOffset {
    pub x: i32,
    pub y: i32,
}

/// Physical metrics reported by a device context.
///
/// Values come in the device's feed frame (portrait); [`DeviceMetrics::oriented`]
/// rotates them into the frame the application draws in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub dpi: Resolution,
    /// Whole sheet.
    pub physical: PixelSize,
    /// Distance from the sheet corner to the printable corner.
    pub offset: PixelOffset,
    /// Printable extent.
    pub printable: PixelSize,
}

impl DeviceMetrics {
    pub fn oriented(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Portrait => self,
            Orientation::Landscape => Self {
                dpi: self.dpi.swapped(),
                physical: PixelSize {
                    width: self.physical.height,
                    height: self.physical.width,
                },
                offset: PixelOffset {
                    x: self.offset.y,
                    y: self.offset.x,
                },
                printable: PixelSize {
                    width: self.printable.height,
                    height: self.printable.width,
                },
            },
        }
    }

    pub fn page_size(&self) -> SizeTenths {
        SizeTenths::new(
            px_to_tenths(self.physical.width, self.dpi.x),
            px_to_tenths(self.physical.height, self.dpi.y),
        )
    }

    pub fn margins(&self) -> Margins {
        let right_px = self.physical.width - self.offset.x - self.printable.width;
        let bottom_px = self.physical.height - self.offset.y - self.printable.height;
        Margins {
            left: px_to_tenths(self.offset.x, self.dpi.x),
            top: px_to_tenths(self.offset.y, self.dpi.y),
            right: px_to_tenths(right_px.max(0), self.dpi.x),
            bottom: px_to_tenths(bottom_px.max(0), self.dpi.y),
        }
    }

    pub fn printable_area(&self) -> RectTenths {
        RectTenths {
            x: px_to_tenths(self.offset.x, self.dpi.x),
            y: px_to_tenths(self.offset.y, self.dpi.y),
            width: px_to_tenths(self.printable.width, self.dpi.x),
            height: px_to_tenths(self.printable.height, self.dpi.y),
        }
    }
}

/// Converts device pixels to tenths of a millimetre, rounding to nearest.
pub fn px_to_tenths(px: i32, dpi: i32) -> i32 {
    if dpi <= 0 {
        return 0;
    }
    let scaled = i64::from(px) * i64::from(TENTHS_MM_PER_INCH);
    div_round(scaled, i64::from(dpi)) as i32
}

/// Converts tenths of a millimetre to device pixels, rounding to nearest.
pub fn tenths_to_px(tenths: i32, dpi: i32) -> i32 {
    let scaled = i64::from(tenths) * i64::from(dpi);
    div_round(scaled, i64::from(TENTHS_MM_PER_INCH)) as i32
}

fn div_round(value: i64, divisor: i64) -> i64 {
    if value >= 0 {
        (value + divisor / 2) / divisor
    } else {
        -((-value + divisor / 2) / divisor)
    }
}

/// Coordinate scale used by drawing operations on a bound surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalUnit {
    #[default]
    DeviceNative,
    HundredthsInch,
    ThousandthsInch,
    TenthsMillimeter,
    HundredthsMillimeter,
    Points,
    Twips,
}

impl LogicalUnit {
    /// Logical units per inch along an axis with the given device resolution.
    pub fn units_per_inch(self, dpi: i32) -> f64 {
        match self {
            Self::DeviceNative => f64::from(dpi),
            Self::HundredthsInch => 100.0,
            Self::ThousandthsInch => 1000.0,
            Self::TenthsMillimeter => 254.0,
            Self::HundredthsMillimeter => 2540.0,
            Self::Points => POINTS_PER_INCH,
            Self::Twips => 1440.0,
        }
    }
}

/// Where logical (0, 0) lands on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    /// Physical corner of the sheet.
    PhysicalPage,
    /// Corner of the printable area.
    #[default]
    PrintableArea,
}

/// Active logical-to-device transform for one bound page.
///
/// Device pixel (0, 0) is the printable-area corner, as native surfaces report
/// it. The y axis grows downward for every unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalMapping {
    pub unit: LogicalUnit,
    pub anchor: Anchor,
    pub dpi: Resolution,
    /// Device pixels per logical unit on each axis.
    pub scale_x: f64,
    pub scale_y: f64,
    /// Device pixel position of logical (0, 0).
    pub origin_x: f64,
    pub origin_y: f64,
    /// Drawable extent reported by the device.
    pub extent: PixelSize,
    units_per_inch_y: f64,
}

impl LogicalMapping {
    pub fn new(unit: LogicalUnit, anchor: Anchor, metrics: &DeviceMetrics) -> Self {
        let upi_x = unit.units_per_inch(metrics.dpi.x);
        let upi_y = unit.units_per_inch(metrics.dpi.y);
        let (origin_x, origin_y) = match anchor {
            Anchor::PrintableArea => (0.0, 0.0),
            Anchor::PhysicalPage => (
                -f64::from(metrics.offset.x),
                -f64::from(metrics.offset.y),
            ),
        };
        Self {
            unit,
            anchor,
            dpi: metrics.dpi,
            scale_x: f64::from(metrics.dpi.x) / upi_x,
            scale_y: f64::from(metrics.dpi.y) / upi_y,
            origin_x,
            origin_y,
            extent: metrics.printable,
            units_per_inch_y: upi_y,
        }
    }

    /// Cached vertical units per logical inch, used for text sizing.
    pub fn units_per_inch(&self) -> f64 {
        self.units_per_inch_y
    }

    pub fn to_device(&self, x: f64, y: f64) -> (f64, f64) {
        (self.origin_x + x * self.scale_x, self.origin_y + y * self.scale_y)
    }

    pub fn to_logical(&self, px: f64, py: f64) -> (f64, f64) {
        ((px - self.origin_x) / self.scale_x, (py - self.origin_y) / self.scale_y)
    }

    /// Drawable extent in logical units.
    pub fn logical_extent(&self) -> (f64, f64) {
        (
            f64::from(self.extent.width) / self.scale_x,
            f64::from(self.extent.height) / self.scale_y,
        )
    }

    /// Converts a logical length along x to device pixels.
    pub fn length_to_device_x(&self, length: f64) -> f64 {
        length * self.scale_x
    }

    pub fn length_to_device_y(&self, length: f64) -> f64 {
        length * self.scale_y
    }
}

/// A font size that always keeps its value in points.
///
/// Conversion happens on demand against whichever mapping is active, so the
/// same value reused under two units never compounds conversions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FontSize {
    points: f64,
}

impl FontSize {
    pub const fn from_points(points: f64) -> Self {
        Self { points }
    }

    pub const fn points(self) -> f64 {
        self.points
    }

    /// Height in logical units under `mapping`.
    pub fn to_logical(self, mapping: &LogicalMapping) -> f64 {
        self.points * mapping.units_per_inch() / POINTS_PER_INCH
    }

    /// Height in device pixels under `mapping`.
    pub fn to_device(self, mapping: &LogicalMapping) -> f64 {
        mapping.length_to_device_y(self.to_logical(mapping))
    }
}
