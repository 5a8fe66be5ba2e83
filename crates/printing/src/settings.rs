//! Device settings blob: typed public fields plus opaque driver-private bytes.
//! 裝置設定資料：公開欄位加上驅動程式私有的不透明位元組。

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilitySet};
use crate::error::{PrintError, PrintResult};
use crate::spooler::{DeviceLimits, Spooler};
use crate::units::SizeTenths;

const BLOB_MAGIC: &[u8; 4] = b"QDEV";
const BLOB_FORMAT_VERSION: u16 = 1;
const MAX_SCALE_PERCENT: u16 = 1000;
/// Ten metres, in tenths of a millimetre.
const MAX_PAPER_EXTENT: i32 = 100_000;

bitflags! {
    /// Fields the driver marks as present in a blob.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SettingsFields: u32 {
        const ORIENTATION = 1 << 0;
        const PAPER_SIZE = 1 << 1;
        const PAPER_LENGTH = 1 << 2;
        const PAPER_WIDTH = 1 << 3;
        const SCALE = 1 << 4;
        const COPIES = 1 << 5;
        const DEFAULT_SOURCE = 1 << 6;
        const COLOR = 1 << 7;
        const DUPLEX = 1 << 8;
        const COLLATE = 1 << 9;
        const MEDIA_TYPE = 1 << 10;
    }
}

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub const fn toggled(self) -> Self {
        match self {
            Orientation::Portrait => Orientation::Landscape,
            Orientation::Landscape => Orientation::Portrait,
        }
    }
}

/// Duplex (two-sided) printing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplexMode {
    #[default]
    Off,
    LongEdge,
    ShortEdge,
}

/// Colour mode for the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    #[default]
    Monochrome,
    Color,
}

/// Driver paper identifier. Standard codes follow the common spooler numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(pub u16);

impl PaperId {
    pub const LETTER: PaperId = PaperId(1);
    pub const LEGAL: PaperId = PaperId(5);
    pub const A3: PaperId = PaperId(8);
    pub const A4: PaperId = PaperId(9);
    pub const A5: PaperId = PaperId(11);
    /// Dimensions come from the custom length/width fields.
    pub const CUSTOM: PaperId = PaperId(256);
}

/// Driver paper-bin identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperSourceId(pub u16);

/// Driver media-type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaTypeId(pub u32);

/// Settings for one device as produced by its driver.
///
/// A blob is only meaningful for the device it came from. The driver-private
/// tail is copied and compared, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettingsBlob {
    device: String,
    driver_version: u16,
    fields: SettingsFields,
    orientation: Orientation,
    paper: PaperId,
    paper_width: i32,
    paper_length: i32,
    scale: u16,
    copies: u16,
    source: PaperSourceId,
    color: ColorMode,
    duplex: DuplexMode,
    collate: bool,
    media_type: MediaTypeId,
    driver_private: Vec<u8>,
}

/// Initial values a driver hands out for its default blob.
#[derive(Debug, Clone)]
pub struct DriverDefaults {
    pub driver_version: u16,
    pub fields: SettingsFields,
    pub orientation: Orientation,
    pub paper: PaperId,
    pub paper_size: SizeTenths,
    pub source: PaperSourceId,
    pub color: ColorMode,
    pub media_type: MediaTypeId,
    pub driver_private: Vec<u8>,
}

impl DeviceSettingsBlob {
    pub fn from_driver(device: impl Into<String>, defaults: DriverDefaults) -> Self {
        Self {
            device: device.into(),
            driver_version: defaults.driver_version,
            fields: defaults.fields,
            orientation: defaults.orientation,
            paper: defaults.paper,
            paper_width: defaults.paper_size.width,
            paper_length: defaults.paper_size.height,
            scale: 100,
            copies: 1,
            source: defaults.source,
            color: defaults.color,
            duplex: DuplexMode::Off,
            collate: false,
            media_type: defaults.media_type,
            driver_private: defaults.driver_private,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn driver_version(&self) -> u16 {
        self.driver_version
    }

    pub fn present_fields(&self) -> SettingsFields {
        self.fields
    }

    pub fn driver_private(&self) -> &[u8] {
        &self.driver_private
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn paper(&self) -> PaperId {
        self.paper
    }

    /// Custom paper dimensions in the portrait frame.
    pub fn custom_paper_size(&self) -> SizeTenths {
        SizeTenths::new(self.paper_width, self.paper_length)
    }

    pub fn scale(&self) -> u16 {
        self.scale
    }

    pub fn copies(&self) -> u16 {
        self.copies
    }

    pub fn paper_source(&self) -> PaperSourceId {
        self.source
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color
    }

    pub fn duplex(&self) -> DuplexMode {
        self.duplex
    }

    pub fn collate(&self) -> bool {
        self.collate
    }

    pub fn media_type(&self) -> MediaTypeId {
        self.media_type
    }

    /// Copies the fields present in `from` into `self`.
    ///
    /// Fails when the two blobs do not share a shape (driver version and
    /// private-area size). Applying the same `from` twice is a no-op.
    pub fn merge_from(&mut self, from: &DeviceSettingsBlob) -> PrintResult<()> {
        if self.driver_version != from.driver_version {
            return Err(PrintError::InvalidSettings(format!(
                "driver version {} does not match {}",
                from.driver_version, self.driver_version
            )));
        }
        if self.driver_private.len() != from.driver_private.len() {
            return Err(PrintError::InvalidSettings(format!(
                "driver-private size {} does not match {}",
                from.driver_private.len(),
                self.driver_private.len()
            )));
        }

        let fields = from.fields;
        if fields.contains(SettingsFields::ORIENTATION) {
            self.orientation = from.orientation;
        }
        if fields.contains(SettingsFields::PAPER_SIZE) {
            self.paper = from.paper;
        }
        if fields.contains(SettingsFields::PAPER_WIDTH) {
            self.paper_width = from.paper_width;
        }
        if fields.contains(SettingsFields::PAPER_LENGTH) {
            self.paper_length = from.paper_length;
        }
        if fields.contains(SettingsFields::SCALE) {
            self.scale = from.scale;
        }
        if fields.contains(SettingsFields::COPIES) {
            self.copies = from.copies;
        }
        if fields.contains(SettingsFields::DEFAULT_SOURCE) {
            self.source = from.source;
        }
        if fields.contains(SettingsFields::COLOR) {
            self.color = from.color;
        }
        if fields.contains(SettingsFields::DUPLEX) {
            self.duplex = from.duplex;
        }
        if fields.contains(SettingsFields::COLLATE) {
            self.collate = from.collate;
        }
        if fields.contains(SettingsFields::MEDIA_TYPE) {
            self.media_type = from.media_type;
        }
        self.fields |= fields;
        self.driver_private.clone_from(&from.driver_private);
        Ok(())
    }

    pub fn set_copies(
        &mut self,
        caps: CapabilitySet,
        limits: &DeviceLimits,
        copies: u16,
    ) -> PrintResult<()> {
        require(caps, Capability::Copies)?;
        if copies == 0 || copies > limits.max_copies {
            return Err(PrintError::invalid_argument(
                "copies",
                format!("{copies} is outside 1..={}", limits.max_copies),
            ));
        }
        self.copies = copies;
        self.fields |= SettingsFields::COPIES;
        Ok(())
    }

    pub fn set_scale(&mut self, caps: CapabilitySet, percent: u16) -> PrintResult<()> {
        require(caps, Capability::Scale)?;
        if percent == 0 || percent > MAX_SCALE_PERCENT {
            return Err(PrintError::invalid_argument(
                "scale",
                format!("{percent}% is outside 1..={MAX_SCALE_PERCENT}"),
            ));
        }
        self.scale = percent;
        self.fields |= SettingsFields::SCALE;
        Ok(())
    }

    pub fn set_orientation(
        &mut self,
        caps: CapabilitySet,
        orientation: Orientation,
    ) -> PrintResult<()> {
        require(caps, Capability::Orientation)?;
        self.orientation = orientation;
        self.fields |= SettingsFields::ORIENTATION;
        Ok(())
    }

    pub fn set_duplex(&mut self, caps: CapabilitySet, duplex: DuplexMode) -> PrintResult<()> {
        require(caps, Capability::Duplex)?;
        self.duplex = duplex;
        self.fields |= SettingsFields::DUPLEX;
        Ok(())
    }

    pub fn set_collate(&mut self, caps: CapabilitySet, collate: bool) -> PrintResult<()> {
        require(caps, Capability::Collate)?;
        self.collate = collate;
        self.fields |= SettingsFields::COLLATE;
        Ok(())
    }

    pub fn set_color_mode(&mut self, caps: CapabilitySet, color: ColorMode) -> PrintResult<()> {
        require(caps, Capability::Color)?;
        self.color = color;
        self.fields |= SettingsFields::COLOR;
        Ok(())
    }

    pub fn set_paper_source(
        &mut self,
        caps: CapabilitySet,
        limits: &DeviceLimits,
        source: PaperSourceId,
    ) -> PrintResult<()> {
        require(caps, Capability::PaperSource)?;
        if !limits.paper_sources.contains(&source) {
            return Err(PrintError::invalid_argument(
                "paper source",
                format!("bin {} is not offered by the device", source.0),
            ));
        }
        self.source = source;
        self.fields |= SettingsFields::DEFAULT_SOURCE;
        Ok(())
    }

    pub fn set_media_type(
        &mut self,
        caps: CapabilitySet,
        limits: &DeviceLimits,
        media_type: MediaTypeId,
    ) -> PrintResult<()> {
        require(caps, Capability::MediaType)?;
        if !limits.media_types.contains(&media_type) {
            return Err(PrintError::invalid_argument(
                "media type",
                format!("media {} is not offered by the device", media_type.0),
            ));
        }
        self.media_type = media_type;
        self.fields |= SettingsFields::MEDIA_TYPE;
        Ok(())
    }

    pub fn set_paper(
        &mut self,
        caps: CapabilitySet,
        limits: &DeviceLimits,
        paper: PaperId,
    ) -> PrintResult<()> {
        require(caps, Capability::PaperSize)?;
        if paper == PaperId::CUSTOM {
            return Err(PrintError::invalid_argument(
                "paper size",
                "use a custom paper size to select user-defined dimensions",
            ));
        }
        if !limits.papers.contains(&paper) {
            return Err(PrintError::invalid_argument(
                "paper size",
                format!("paper {} is not offered by the device", paper.0),
            ));
        }
        self.paper = paper;
        self.fields |= SettingsFields::PAPER_SIZE;
        Ok(())
    }

    /// Selects user-defined paper dimensions, given in the portrait frame.
    pub fn set_custom_paper_size(
        &mut self,
        caps: CapabilitySet,
        size: SizeTenths,
    ) -> PrintResult<()> {
        require(caps, Capability::PaperSize)?;
        require(caps, Capability::CustomPaper)?;
        for (label, extent) in [("width", size.width), ("height", size.height)] {
            if extent <= 0 || extent > MAX_PAPER_EXTENT {
                return Err(PrintError::invalid_argument(
                    "paper size",
                    format!("{label} {extent} is outside 1..={MAX_PAPER_EXTENT} tenths of a millimetre"),
                ));
            }
        }
        self.paper = PaperId::CUSTOM;
        self.paper_width = size.width;
        self.paper_length = size.height;
        self.fields |=
            SettingsFields::PAPER_SIZE | SettingsFields::PAPER_WIDTH | SettingsFields::PAPER_LENGTH;
        Ok(())
    }

    /// Encodes the blob into its opaque exchange form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.device.as_bytes();
        let mut out = Vec::with_capacity(48 + name.len() + self.driver_private.len());
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&BLOB_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.driver_version.to_le_bytes());
        // Total length, patched below.
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.fields.bits().to_le_bytes());
        out.push(orientation_code(self.orientation));
        out.push(color_code(self.color));
        out.push(duplex_code(self.duplex));
        out.push(u8::from(self.collate));
        out.extend_from_slice(&self.paper.0.to_le_bytes());
        out.extend_from_slice(&self.scale.to_le_bytes());
        out.extend_from_slice(&self.copies.to_le_bytes());
        out.extend_from_slice(&self.source.0.to_le_bytes());
        out.extend_from_slice(&self.paper_width.to_le_bytes());
        out.extend_from_slice(&self.paper_length.to_le_bytes());
        out.extend_from_slice(&self.media_type.0.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(self.driver_private.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.driver_private);
        let total = out.len() as u32;
        out[8..12].copy_from_slice(&total.to_le_bytes());
        out
    }

    /// Decodes an exchange buffer. Only the shape is checked here; the driver
    /// still has to validate the contents before they are merged.
    pub fn from_bytes(bytes: &[u8]) -> PrintResult<Self> {
        let mut reader = BlobReader::new(bytes);
        if reader.take(4)? != BLOB_MAGIC {
            return Err(PrintError::InvalidSettings("missing blob signature".into()));
        }
        let format = reader.u16()?;
        if format != BLOB_FORMAT_VERSION {
            return Err(PrintError::InvalidSettings(format!(
                "unsupported blob format {format}"
            )));
        }
        let driver_version = reader.u16()?;
        let total = reader.u32()? as usize;
        if total != bytes.len() {
            return Err(PrintError::InvalidSettings(format!(
                "declared size {total} does not match buffer size {}",
                bytes.len()
            )));
        }
        let fields = SettingsFields::from_bits(reader.u32()?)
            .ok_or_else(|| PrintError::InvalidSettings("unknown field bits".into()))?;
        let orientation = decode_orientation(reader.u8()?)?;
        let color = decode_color(reader.u8()?)?;
        let duplex = decode_duplex(reader.u8()?)?;
        let collate = reader.u8()? != 0;
        let paper = PaperId(reader.u16()?);
        let scale = reader.u16()?;
        let copies = reader.u16()?;
        let source = PaperSourceId(reader.u16()?);
        let paper_width = reader.i32()?;
        let paper_length = reader.i32()?;
        let media_type = MediaTypeId(reader.u32()?);
        let name_len = reader.u16()? as usize;
        let device = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| PrintError::InvalidSettings("device name is not UTF-8".into()))?
            .to_string();
        let private_len = reader.u32()? as usize;
        let driver_private = reader.take(private_len)?.to_vec();
        if !reader.is_empty() {
            return Err(PrintError::InvalidSettings("trailing bytes after blob".into()));
        }

        Ok(Self {
            device,
            driver_version,
            fields,
            orientation,
            paper,
            paper_width,
            paper_length,
            scale,
            copies,
            source,
            color,
            duplex,
            collate,
            media_type,
            driver_private,
        })
    }
}

/// Opens `device` and fetches the blob its driver hands out by default.
pub fn acquire_default<S: Spooler>(spooler: &S, device: &str) -> PrintResult<DeviceSettingsBlob> {
    spooler
        .open_device(device)
        .map_err(|err| PrintError::from_open(device, err))?;
    spooler
        .default_settings(device)
        .map_err(|err| PrintError::from_open(device, err))
}

/// Returns `into` with the fields of `from` applied.
pub fn merge(
    into: &DeviceSettingsBlob,
    from: &DeviceSettingsBlob,
) -> PrintResult<DeviceSettingsBlob> {
    let mut merged = into.clone();
    merged.merge_from(from)?;
    Ok(merged)
}

fn require(caps: CapabilitySet, capability: Capability) -> PrintResult<()> {
    if caps.supports(capability) {
        Ok(())
    } else {
        Err(PrintError::UnsupportedCapability(capability))
    }
}

fn orientation_code(value: Orientation) -> u8 {
    match value {
        Orientation::Portrait => 1,
        Orientation::Landscape => 2,
    }
}

fn decode_orientation(code: u8) -> PrintResult<Orientation> {
    match code {
        1 => Ok(Orientation::Portrait),
        2 => Ok(Orientation::Landscape),
        other => Err(PrintError::InvalidSettings(format!("orientation code {other}"))),
    }
}

fn color_code(value: ColorMode) -> u8 {
    match value {
        ColorMode::Monochrome => 1,
        ColorMode::Color => 2,
    }
}

fn decode_color(code: u8) -> PrintResult<ColorMode> {
    match code {
        1 => Ok(ColorMode::Monochrome),
        2 => Ok(ColorMode::Color),
        other => Err(PrintError::InvalidSettings(format!("color code {other}"))),
    }
}

fn duplex_code(value: DuplexMode) -> u8 {
    match value {
        DuplexMode::Off => 1,
        DuplexMode::LongEdge => 2,
        DuplexMode::ShortEdge => 3,
    }
}

fn decode_duplex(code: u8) -> PrintResult<DuplexMode> {
    match code {
        1 => Ok(DuplexMode::Off),
        2 => Ok(DuplexMode::LongEdge),
        3 => Ok(DuplexMode::ShortEdge),
        other => Err(PrintError::InvalidSettings(format!("duplex code {other}"))),
    }
}

struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> PrintResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| PrintError::InvalidSettings("blob is truncated".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> PrintResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> PrintResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> PrintResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> PrintResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> PrintResult<i32> {
        self.array().map(i32::from_le_bytes)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_copies: 99,
            papers: vec![PaperId::A4, PaperId::LETTER],
            paper_sources: vec![PaperSourceId(7)],
            media_types: vec![MediaTypeId(1)],
        }
    }

    fn sample(fields: SettingsFields) -> DeviceSettingsBlob {
        DeviceSettingsBlob::from_driver(
            "Office Laser",
            DriverDefaults {
                driver_version: 0x0401,
                fields,
                orientation: Orientation::Portrait,
                paper: PaperId::A4,
                paper_size: SizeTenths::new(2100, 2970),
                source: PaperSourceId(7),
                color: ColorMode::Monochrome,
                media_type: MediaTypeId(1),
                driver_private: vec![0xAB; 12],
            },
        )
    }

    #[test]
    fn copies_are_range_checked() {
        let mut blob = sample(SettingsFields::all());
        let caps = CapabilitySet::derive(&blob);
        assert!(matches!(
            blob.set_copies(caps, &limits(), 0),
            Err(PrintError::InvalidArgument { what: "copies", .. })
        ));
        assert!(blob.set_copies(caps, &limits(), 100).is_err());
        blob.set_copies(caps, &limits(), 3).unwrap();
        assert_eq!(blob.copies(), 3);
    }

    #[test]
    fn setters_refuse_missing_capabilities() {
        let mut blob = sample(SettingsFields::ORIENTATION | SettingsFields::PAPER_SIZE);
        let caps = CapabilitySet::derive(&blob);
        assert!(matches!(
            blob.set_duplex(caps, DuplexMode::LongEdge),
            Err(PrintError::UnsupportedCapability(Capability::Duplex))
        ));
        assert!(matches!(
            blob.set_scale(caps, 50),
            Err(PrintError::UnsupportedCapability(Capability::Scale))
        ));
        assert_eq!(blob.duplex(), DuplexMode::Off);
    }

    #[test]
    fn custom_size_needs_the_extent_fields() {
        let mut blob = sample(SettingsFields::PAPER_SIZE | SettingsFields::COPIES);
        let caps = CapabilitySet::derive(&blob);
        assert!(matches!(
            blob.set_custom_paper_size(caps, SizeTenths::new(1000, 1500)),
            Err(PrintError::UnsupportedCapability(Capability::CustomPaper))
        ));
        assert_eq!(blob.paper(), PaperId::A4);
        assert!(!blob.present_fields().contains(SettingsFields::PAPER_WIDTH));
    }

    #[test]
    fn scale_must_be_nonzero() {
        let mut blob = sample(SettingsFields::all());
        let caps = CapabilitySet::derive(&blob);
        assert!(blob.set_scale(caps, 0).is_err());
        blob.set_scale(caps, 75).unwrap();
        assert_eq!(blob.scale(), 75);
    }

    #[test]
    fn merge_applies_only_present_fields() {
        let base = sample(SettingsFields::all());
        let mut partial = sample(SettingsFields::empty());
        let caps = CapabilitySet::all();
        partial.set_orientation(caps, Orientation::Landscape).unwrap();
        partial.copies = 40;

        let merged = merge(&base, &partial).unwrap();
        assert_eq!(merged.orientation(), Orientation::Landscape);
        assert_eq!(merged.copies(), 1);
        assert_eq!(merge(&merged, &partial).unwrap(), merged);
    }

    #[test]
    fn merge_rejects_shape_mismatch() {
        let base = sample(SettingsFields::all());
        let mut other = sample(SettingsFields::all());
        other.driver_private.push(0);
        assert!(matches!(
            merge(&base, &other),
            Err(PrintError::InvalidSettings(_))
        ));
    }

    #[test]
    fn bytes_round_trip_and_reject_truncation() {
        let mut blob = sample(SettingsFields::all());
        blob.set_custom_paper_size(CapabilitySet::all(), SizeTenths::new(1000, 1500))
            .unwrap();
        let bytes = blob.to_bytes();
        assert_eq!(DeviceSettingsBlob::from_bytes(&bytes).unwrap(), blob);
        assert!(DeviceSettingsBlob::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut corrupt = bytes.clone();
        corrupt[0] = b'X';
        assert!(DeviceSettingsBlob::from_bytes(&corrupt).is_err());
    }
}
