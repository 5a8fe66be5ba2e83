//! Printer sessions over a native print subsystem: device settings and
//! capability negotiation, the job/page state machine, and binding of the
//! live rendering surface to a drawing consumer.

pub mod capability;
pub mod config;
pub mod display;
pub mod error;
pub mod job;
pub mod preview;
pub mod session;
pub mod settings;
pub mod spooler;
pub mod surface;
pub mod units;
pub mod virtual_spooler;

pub use capability::{Capability, CapabilitySet};
pub use config::{ConfigError, ResyncPolicy, SessionConfig, SessionConfigStore};
pub use display::{
    Color, DisplayCommand, GlyphRun, Point, PrintDisplayList, RecordedPage, RecordingSurface,
    Rectangle, Size, Stroke,
};
pub use error::{PrintError, PrintResult};
pub use job::{JobController, JobState, Outcome};
pub use preview::{render_preview_png, PreviewEntry, PreviewError};
pub use session::PrinterSession;
pub use settings::{
    acquire_default, merge, ColorMode, DeviceSettingsBlob, DriverDefaults, DuplexMode,
    MediaTypeId, Orientation, PaperId, PaperSourceId, SettingsFields,
};
pub use spooler::{
    available_devices, default_device_name, ContextKind, DeviceContext, DeviceLimits, DocInfo,
    JobCommand, JobId, JobInfo, JobStatus, MediaTypeInfo, PageEnd, PaperInfo, PaperSourceInfo,
    Spooler, SpoolerError, StartDoc, SurfaceHandle,
};
pub use surface::{DrawContext, DrawingSurface, NoSurface, PreDrawCheck, SurfaceBinder};
pub use units::{
    px_to_tenths, tenths_to_px, Anchor, DeviceMetrics, FontSize, LogicalMapping, LogicalUnit,
    Margins, PixelOffset, PixelSize, RectTenths, Resolution, SizeTenths,
};
pub use virtual_spooler::{
    CatalogError, CustomPaperPolicy, DriverFeature, PromptBehavior, SpoolReport, SpooledPage,
    VirtualCatalog, VirtualContext, VirtualDevice, VirtualSpooler,
};
