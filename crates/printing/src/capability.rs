use std::fmt;

use bitflags::bitflags;

use crate::settings::{DeviceSettingsBlob, SettingsFields};

bitflags! {
    /// Features a driver claims to support for one device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilitySet: u16 {
        const COPIES = 1 << 0;
        const ORIENTATION = 1 << 1;
        const COLLATE = 1 << 2;
        const COLOR = 1 << 3;
        const DUPLEX = 1 << 4;
        const SCALE = 1 << 5;
        const PAPER_SOURCE = 1 << 6;
        const PAPER_SIZE = 1 << 7;
        const MEDIA_TYPE = 1 << 8;
        const CUSTOM_PAPER = 1 << 9;
    }
}

/// A single capability, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Copies,
    Orientation,
    Collate,
    Color,
    Duplex,
    Scale,
    PaperSource,
    PaperSize,
    MediaType,
    CustomPaper,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::Copies,
        Capability::Orientation,
        Capability::Collate,
        Capability::Color,
        Capability::Duplex,
        Capability::Scale,
        Capability::PaperSource,
        Capability::PaperSize,
        Capability::MediaType,
        Capability::CustomPaper,
    ];

    pub const fn flag(self) -> CapabilitySet {
        match self {
            Capability::Copies => CapabilitySet::COPIES,
            Capability::Orientation => CapabilitySet::ORIENTATION,
            Capability::Collate => CapabilitySet::COLLATE,
            Capability::Color => CapabilitySet::COLOR,
            Capability::Duplex => CapabilitySet::DUPLEX,
            Capability::Scale => CapabilitySet::SCALE,
            Capability::PaperSource => CapabilitySet::PAPER_SOURCE,
            Capability::PaperSize => CapabilitySet::PAPER_SIZE,
            Capability::MediaType => CapabilitySet::MEDIA_TYPE,
            Capability::CustomPaper => CapabilitySet::CUSTOM_PAPER,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Capability::Copies => "copies",
            Capability::Orientation => "orientation",
            Capability::Collate => "collation",
            Capability::Color => "color",
            Capability::Duplex => "duplex",
            Capability::Scale => "scale",
            Capability::PaperSource => "paper source",
            Capability::PaperSize => "paper size",
            Capability::MediaType => "media type",
            Capability::CustomPaper => "custom paper size",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl CapabilitySet {
    /// Derives capabilities from the fields the driver marked present.
    pub fn derive(blob: &DeviceSettingsBlob) -> Self {
        let fields = blob.present_fields();
        let mut caps = CapabilitySet::empty();
        let pairs = [
            (SettingsFields::COPIES, CapabilitySet::COPIES),
            (SettingsFields::ORIENTATION, CapabilitySet::ORIENTATION),
            (SettingsFields::COLLATE, CapabilitySet::COLLATE),
            (SettingsFields::COLOR, CapabilitySet::COLOR),
            (SettingsFields::DUPLEX, CapabilitySet::DUPLEX),
            (SettingsFields::SCALE, CapabilitySet::SCALE),
            (SettingsFields::DEFAULT_SOURCE, CapabilitySet::PAPER_SOURCE),
            (SettingsFields::MEDIA_TYPE, CapabilitySet::MEDIA_TYPE),
        ];
        for (field, cap) in pairs {
            if fields.contains(field) {
                caps |= cap;
            }
        }
        let custom = SettingsFields::PAPER_LENGTH | SettingsFields::PAPER_WIDTH;
        if fields.contains(SettingsFields::PAPER_SIZE) || fields.contains(custom) {
            caps |= CapabilitySet::PAPER_SIZE;
        }
        // User-defined dimensions need both extent fields.
        if fields.contains(custom) {
            caps |= CapabilitySet::CUSTOM_PAPER;
        }
        caps
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// Iterates the individual capabilities present in the set.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.supports(*capability))
    }
}
