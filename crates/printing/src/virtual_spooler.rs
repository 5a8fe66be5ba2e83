//! In-process spooler backend with a configurable device catalog.
//! 可設定裝置目錄的行程內列印佇列實作。
//!
//! Jobs live in a table shared by every context the spooler hands out, so a
//! `control_job` call from "outside" is seen by the running job at its next
//! page boundary, the same way a native queue behaves.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::{
    ColorMode, DeviceSettingsBlob, DriverDefaults, DuplexMode, MediaTypeId, Orientation, PaperId,
    PaperSourceId, SettingsFields,
};
use crate::spooler::{
    ContextKind, DeviceContext, DeviceLimits, DocInfo, JobCommand, JobId, JobInfo, JobStatus,
    MediaTypeInfo, PageEnd, PaperInfo, PaperSourceInfo, Spooler, SpoolerError, StartDoc,
    SurfaceHandle,
};
use crate::units::{
    tenths_to_px, DeviceMetrics, Margins, PixelOffset, PixelSize, Resolution, SizeTenths,
};

/// Settings features a virtual driver advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverFeature {
    Copies,
    Orientation,
    Collate,
    Color,
    Duplex,
    Scale,
    PaperSource,
    PaperSize,
    CustomPaper,
    MediaType,
}

impl DriverFeature {
    pub const ALL: [DriverFeature; 10] = [
        DriverFeature::Copies,
        DriverFeature::Orientation,
        DriverFeature::Collate,
        DriverFeature::Color,
        DriverFeature::Duplex,
        DriverFeature::Scale,
        DriverFeature::PaperSource,
        DriverFeature::PaperSize,
        DriverFeature::CustomPaper,
        DriverFeature::MediaType,
    ];

    fn fields(self) -> SettingsFields {
        match self {
            DriverFeature::Copies => SettingsFields::COPIES,
            DriverFeature::Orientation => SettingsFields::ORIENTATION,
            DriverFeature::Collate => SettingsFields::COLLATE,
            DriverFeature::Color => SettingsFields::COLOR,
            DriverFeature::Duplex => SettingsFields::DUPLEX,
            DriverFeature::Scale => SettingsFields::SCALE,
            DriverFeature::PaperSource => SettingsFields::DEFAULT_SOURCE,
            DriverFeature::PaperSize => SettingsFields::PAPER_SIZE,
            DriverFeature::CustomPaper => SettingsFields::PAPER_LENGTH | SettingsFields::PAPER_WIDTH,
            DriverFeature::MediaType => SettingsFields::MEDIA_TYPE,
        }
    }
}

/// How the driver treats user-defined paper dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CustomPaperPolicy {
    #[default]
    Honor,
    /// Snap to the closest standard sheet the device offers.
    NearestStandard,
}

/// Behaviour of the interactive prompt some drivers show on job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptBehavior {
    #[default]
    Never,
    /// The user always dismisses the prompt.
    Decline,
    /// File ports prompt for a path unless output is redirected; the user
    /// dismisses it.
    DeclineUnlessRedirected,
}

/// One device in the virtual catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub name: String,
    #[serde(default = "default_driver_version")]
    pub driver_version: u16,
    pub dpi: Resolution,
    pub papers: Vec<PaperInfo>,
    pub default_paper: PaperId,
    /// Non-printable border in the feed frame.
    #[serde(default)]
    pub hardware_margins: Margins,
    #[serde(default = "all_features")]
    pub features: Vec<DriverFeature>,
    #[serde(default = "default_max_copies")]
    pub max_copies: u16,
    #[serde(default)]
    pub fonts: Vec<String>,
    #[serde(default)]
    pub paper_sources: Vec<PaperSourceInfo>,
    #[serde(default)]
    pub media_types: Vec<MediaTypeInfo>,
    #[serde(default)]
    pub default_color: ColorMode,
    #[serde(default)]
    pub driver_private_len: usize,
    #[serde(default)]
    pub custom_paper: CustomPaperPolicy,
    #[serde(default)]
    pub prompt: PromptBehavior,
}

fn default_driver_version() -> u16 {
    0x0400
}

fn all_features() -> Vec<DriverFeature> {
    DriverFeature::ALL.to_vec()
}

fn default_max_copies() -> u16 {
    999
}

impl VirtualDevice {
    pub fn supported_fields(&self) -> SettingsFields {
        self.features
            .iter()
            .fold(SettingsFields::empty(), |acc, feature| acc | feature.fields())
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_copies: self.max_copies,
            papers: self.papers.iter().map(|paper| paper.id).collect(),
            paper_sources: self.paper_sources.iter().map(|source| source.id).collect(),
            media_types: self.media_types.iter().map(|media| media.id).collect(),
        }
    }

    fn paper(&self, id: PaperId) -> Option<&PaperInfo> {
        self.papers.iter().find(|paper| paper.id == id)
    }

    /// Sheet size the driver would actually feed for `settings`, in the feed frame.
    pub fn effective_paper_size(&self, settings: &DeviceSettingsBlob) -> SizeTenths {
        if settings.paper() == PaperId::CUSTOM {
            let requested = settings.custom_paper_size();
            let honored = self.custom_paper == CustomPaperPolicy::Honor
                && self.features.contains(&DriverFeature::CustomPaper);
            if honored {
                return requested;
            }
            return self
                .papers
                .iter()
                .min_by_key(|paper| {
                    (paper.size.width - requested.width).abs()
                        + (paper.size.height - requested.height).abs()
                })
                .map_or(requested, |paper| paper.size);
        }
        self.paper(settings.paper())
            .or_else(|| self.paper(self.default_paper))
            .map_or(SizeTenths::new(2100, 2970), |paper| paper.size)
    }

    fn metrics_for(&self, settings: &DeviceSettingsBlob) -> DeviceMetrics {
        let size = self.effective_paper_size(settings);
        let margins = self.hardware_margins;
        let physical = PixelSize {
            width: tenths_to_px(size.width, self.dpi.x),
            height: tenths_to_px(size.height, self.dpi.y),
        };
        let offset = PixelOffset {
            x: tenths_to_px(margins.left, self.dpi.x),
            y: tenths_to_px(margins.top, self.dpi.y),
        };
        let right = tenths_to_px(margins.right, self.dpi.x);
        let bottom = tenths_to_px(margins.bottom, self.dpi.y);
        DeviceMetrics {
            dpi: self.dpi,
            physical,
            offset,
            printable: PixelSize {
                width: (physical.width - offset.x - right).max(0),
                height: (physical.height - offset.y - bottom).max(0),
            },
        }
    }

    fn validate(&self, settings: &DeviceSettingsBlob) -> Result<(), String> {
        if settings.driver_version() != self.driver_version {
            return Err(format!(
                "driver version {:#06x} does not match {:#06x}",
                settings.driver_version(),
                self.driver_version
            ));
        }
        if settings.driver_private().len() != self.driver_private_len {
            return Err(format!(
                "driver-private area is {} bytes, expected {}",
                settings.driver_private().len(),
                self.driver_private_len
            ));
        }
        let unsupported = settings.present_fields() - self.supported_fields();
        if !unsupported.is_empty() {
            return Err(format!("fields {unsupported:?} are not supported"));
        }
        let fields = settings.present_fields();
        if fields.contains(SettingsFields::COPIES)
            && (settings.copies() == 0 || settings.copies() > self.max_copies)
        {
            return Err(format!("{} copies exceeds the device range", settings.copies()));
        }
        if fields.contains(SettingsFields::SCALE) && settings.scale() == 0 {
            return Err("scale must be nonzero".into());
        }
        if fields.contains(SettingsFields::PAPER_SIZE)
            && settings.paper() != PaperId::CUSTOM
            && self.paper(settings.paper()).is_none()
        {
            return Err(format!("paper {} is unknown", settings.paper().0));
        }
        if fields.contains(SettingsFields::DEFAULT_SOURCE)
            && !self
                .paper_sources
                .iter()
                .any(|source| source.id == settings.paper_source())
        {
            return Err(format!("paper source {} is unknown", settings.paper_source().0));
        }
        if fields.contains(SettingsFields::MEDIA_TYPE)
            && !self
                .media_types
                .iter()
                .any(|media| media.id == settings.media_type())
        {
            return Err(format!("media type {} is unknown", settings.media_type().0));
        }
        Ok(())
    }

    fn default_blob(&self) -> DeviceSettingsBlob {
        let paper_size = self
            .paper(self.default_paper)
            .map_or(SizeTenths::new(2100, 2970), |paper| paper.size);
        DeviceSettingsBlob::from_driver(
            self.name.clone(),
            DriverDefaults {
                driver_version: self.driver_version,
                fields: self.supported_fields(),
                orientation: Orientation::Portrait,
                paper: self.default_paper,
                paper_size,
                source: self
                    .paper_sources
                    .first()
                    .map_or(PaperSourceId(0), |source| source.id),
                color: self.default_color,
                media_type: self
                    .media_types
                    .first()
                    .map_or(MediaTypeId(0), |media| media.id),
                driver_private: private_area(&self.name, self.driver_private_len),
            },
        )
    }
}

/// Deterministic filler for the driver-private area.
fn private_area(name: &str, len: usize) -> Vec<u8> {
    let seed = name.bytes().fold(0x5Au8, |acc, byte| acc.rotate_left(3) ^ byte);
    (0..len).map(|index| seed.wrapping_add(index as u8)).collect()
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read device catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse device catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("device catalog lists `{0}` more than once")]
    DuplicateDevice(String),
    #[error("default device `{0}` is not in the catalog")]
    UnknownDefault(String),
}

/// Serializable description of every virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualCatalog {
    #[serde(default)]
    pub default_device: Option<String>,
    pub devices: Vec<VirtualDevice>,
}

impl VirtualCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.clone(),
            source,
        })?;
        let catalog: VirtualCatalog =
            serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
                path: path.clone(),
                source,
            })?;
        catalog.check()?;
        Ok(catalog)
    }

    fn check(&self) -> Result<(), CatalogError> {
        for (index, device) in self.devices.iter().enumerate() {
            if self.devices[..index]
                .iter()
                .any(|other| other.name == device.name)
            {
                return Err(CatalogError::DuplicateDevice(device.name.clone()));
            }
        }
        if let Some(name) = &self.default_device {
            if !self.devices.iter().any(|device| &device.name == name) {
                return Err(CatalogError::UnknownDefault(name.clone()));
            }
        }
        Ok(())
    }

    /// Devices available without any catalog file.
    pub fn builtin() -> Self {
        let iso = vec![
            paper(PaperId::A4, "A4", 2100, 2970),
            paper(PaperId::LETTER, "Letter", 2159, 2794),
            paper(PaperId::LEGAL, "Legal", 2159, 3556),
            paper(PaperId::A5, "A5", 1480, 2100),
            paper(PaperId::A3, "A3", 2970, 4200),
        ];
        Self {
            default_device: Some("Virtual Laser".into()),
            devices: vec![
                VirtualDevice {
                    name: "Virtual Laser".into(),
                    driver_version: default_driver_version(),
                    dpi: Resolution::uniform(600),
                    papers: iso.clone(),
                    default_paper: PaperId::A4,
                    hardware_margins: Margins::uniform(42),
                    features: all_features(),
                    max_copies: 99,
                    fonts: vec!["Courier".into(), "Helvetica".into(), "Times".into()],
                    paper_sources: vec![
                        source(7, "Automatically Select"),
                        source(1, "Tray 1"),
                        source(4, "Manual Feed"),
                    ],
                    media_types: vec![media(1, "Plain Paper"), media(2, "Transparency")],
                    default_color: ColorMode::Color,
                    driver_private_len: 64,
                    custom_paper: CustomPaperPolicy::Honor,
                    prompt: PromptBehavior::Never,
                },
                VirtualDevice {
                    name: "Virtual Receipt".into(),
                    driver_version: 0x0300,
                    dpi: Resolution::uniform(203),
                    papers: vec![paper(PaperId(300), "Roll 80 x 297 mm", 800, 2970)],
                    default_paper: PaperId(300),
                    hardware_margins: Margins {
                        left: 40,
                        top: 0,
                        right: 40,
                        bottom: 0,
                    },
                    features: vec![
                        DriverFeature::Copies,
                        DriverFeature::PaperSize,
                        DriverFeature::CustomPaper,
                    ],
                    max_copies: 9,
                    fonts: vec!["Font A".into(), "Font B".into()],
                    paper_sources: Vec::new(),
                    media_types: Vec::new(),
                    default_color: ColorMode::Monochrome,
                    driver_private_len: 8,
                    custom_paper: CustomPaperPolicy::NearestStandard,
                    prompt: PromptBehavior::Never,
                },
                VirtualDevice {
                    name: "Virtual File Port".into(),
                    driver_version: default_driver_version(),
                    dpi: Resolution::uniform(300),
                    papers: iso,
                    default_paper: PaperId::LETTER,
                    hardware_margins: Margins::default(),
                    features: vec![
                        DriverFeature::Copies,
                        DriverFeature::Orientation,
                        DriverFeature::PaperSize,
                        DriverFeature::Color,
                    ],
                    max_copies: 1,
                    fonts: vec!["Helvetica".into()],
                    paper_sources: Vec::new(),
                    media_types: Vec::new(),
                    default_color: ColorMode::Color,
                    driver_private_len: 0,
                    custom_paper: CustomPaperPolicy::Honor,
                    prompt: PromptBehavior::DeclineUnlessRedirected,
                },
            ],
        }
    }
}

fn paper(id: PaperId, name: &str, width: i32, height: i32) -> PaperInfo {
    PaperInfo {
        id,
        name: name.into(),
        size: SizeTenths::new(width, height),
    }
}

fn source(id: u16, name: &str) -> PaperSourceInfo {
    PaperSourceInfo {
        id: PaperSourceId(id),
        name: name.into(),
    }
}

fn media(id: u32, name: &str) -> MediaTypeInfo {
    MediaTypeInfo {
        id: MediaTypeId(id),
        name: name.into(),
    }
}

/// A page as it left the virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpooledPage {
    pub number: u32,
    pub orientation: Orientation,
    /// Sheet size in the orientation the page was printed in.
    pub size: SizeTenths,
}

/// Record written when a job redirected to a file completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolReport {
    pub job: JobId,
    pub device: String,
    pub document: String,
    pub copies: u16,
    pub color: ColorMode,
    pub duplex: DuplexMode,
    pub pages: Vec<SpooledPage>,
}

#[derive(Debug, Clone)]
struct JobRecord {
    device: String,
    document: String,
    status: JobStatus,
    pages: Vec<SpooledPage>,
}

#[derive(Debug)]
struct SpoolerState {
    catalog: VirtualCatalog,
    jobs: BTreeMap<JobId, JobRecord>,
    next_job: u32,
    next_handle: u64,
}

impl SpoolerState {
    fn device(&self, name: &str) -> Result<&VirtualDevice, SpoolerError> {
        self.catalog
            .devices
            .iter()
            .find(|device| device.name == name)
            .ok_or_else(|| SpoolerError::UnknownDevice(name.to_string()))
    }
}

/// Cloneable handle to one virtual print subsystem.
#[derive(Debug, Clone)]
pub struct VirtualSpooler {
    state: Arc<Mutex<SpoolerState>>,
}

impl Default for VirtualSpooler {
    fn default() -> Self {
        Self::new(VirtualCatalog::builtin())
    }
}

impl VirtualSpooler {
    pub fn new(catalog: VirtualCatalog) -> Self {
        Self {
            state: Arc::new(Mutex::new(SpoolerState {
                catalog,
                jobs: BTreeMap::new(),
                next_job: 1,
                next_handle: 0x1000,
            })),
        }
    }

    pub fn from_catalog_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        VirtualCatalog::load(path).map(Self::new)
    }

    fn lock(&self) -> MutexGuard<'_, SpoolerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pages the device has finalized for `job`, in order.
    pub fn spooled_pages(&self, job: JobId) -> Vec<SpooledPage> {
        self.lock()
            .jobs
            .get(&job)
            .map(|record| record.pages.clone())
            .unwrap_or_default()
    }

    /// Every job the spooler has seen, oldest first.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let state = self.lock();
        state
            .jobs
            .iter()
            .map(|(id, record)| job_info(*id, record))
            .collect()
    }
}

fn job_info(id: JobId, record: &JobRecord) -> JobInfo {
    JobInfo {
        id,
        device: record.device.clone(),
        document: record.document.clone(),
        status: record.status,
        pages_printed: record.pages.len() as u32,
    }
}

impl Spooler for VirtualSpooler {
    type Context = VirtualContext;

    fn enumerate_devices(&self) -> Result<Vec<String>, SpoolerError> {
        Ok(self
            .lock()
            .catalog
            .devices
            .iter()
            .map(|device| device.name.clone())
            .collect())
    }

    fn default_device(&self) -> Result<Option<String>, SpoolerError> {
        Ok(self.lock().catalog.default_device.clone())
    }

    fn open_device(&self, device: &str) -> Result<DeviceLimits, SpoolerError> {
        self.lock().device(device).map(VirtualDevice::limits)
    }

    fn default_settings(&self, device: &str) -> Result<DeviceSettingsBlob, SpoolerError> {
        self.lock().device(device).map(VirtualDevice::default_blob)
    }

    fn validate_settings(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
    ) -> Result<(), SpoolerError> {
        self.lock()
            .device(device)?
            .validate(settings)
            .map_err(SpoolerError::SettingsRejected)
    }

    fn paper_sizes(&self, device: &str) -> Result<Vec<PaperInfo>, SpoolerError> {
        self.lock().device(device).map(|found| found.papers.clone())
    }

    fn paper_sources(&self, device: &str) -> Result<Vec<PaperSourceInfo>, SpoolerError> {
        self.lock()
            .device(device)
            .map(|found| found.paper_sources.clone())
    }

    fn media_types(&self, device: &str) -> Result<Vec<MediaTypeInfo>, SpoolerError> {
        self.lock()
            .device(device)
            .map(|found| found.media_types.clone())
    }

    fn create_context(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
        kind: ContextKind,
    ) -> Result<Self::Context, SpoolerError> {
        let mut state = self.lock();
        let found = state.device(device)?.clone();
        state.next_handle += 1;
        let handle = SurfaceHandle(state.next_handle);
        debug!(device, handle = handle.0, ?kind, "virtual context created");
        Ok(VirtualContext {
            state: Arc::clone(&self.state),
            device: found,
            kind,
            handle,
            settings: settings.clone(),
            job: None,
            in_page: false,
            output_file: None,
        })
    }

    fn job_info(&self, device: &str, job: JobId) -> Result<JobInfo, SpoolerError> {
        let state = self.lock();
        state
            .jobs
            .get(&job)
            .filter(|record| record.device == device)
            .map(|record| job_info(job, record))
            .ok_or(SpoolerError::UnknownJob(job))
    }

    fn control_job(
        &self,
        device: &str,
        job: JobId,
        command: JobCommand,
    ) -> Result<(), SpoolerError> {
        let mut state = self.lock();
        let record = state
            .jobs
            .get_mut(&job)
            .filter(|record| record.device == device)
            .ok_or(SpoolerError::UnknownJob(job))?;
        let status = &mut record.status;
        match command {
            JobCommand::Pause => status.insert(JobStatus::PAUSED),
            JobCommand::Resume => status.remove(JobStatus::PAUSED),
            JobCommand::Restart => status.insert(JobStatus::RESTARTED),
            JobCommand::Cancel => status.insert(JobStatus::DELETED),
            JobCommand::Delete => status.insert(JobStatus::DELETING | JobStatus::DELETED),
            JobCommand::Retain => status.insert(JobStatus::RETAINED),
            JobCommand::Release => status.remove(JobStatus::RETAINED),
        }
        debug!(device, %job, ?command, "job control applied");
        Ok(())
    }
}

/// Device context handed out by [`VirtualSpooler`].
#[derive(Debug)]
pub struct VirtualContext {
    state: Arc<Mutex<SpoolerState>>,
    device: VirtualDevice,
    kind: ContextKind,
    handle: SurfaceHandle,
    settings: DeviceSettingsBlob,
    job: Option<JobId>,
    in_page: bool,
    output_file: Option<PathBuf>,
}

impl VirtualContext {
    fn lock(&self) -> MutexGuard<'_, SpoolerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_job(&self) -> Result<JobId, SpoolerError> {
        self.job
            .ok_or_else(|| SpoolerError::Os("no document has been started".into()))
    }

    fn job_cancelled(&self, job: JobId) -> bool {
        self.lock()
            .jobs
            .get(&job)
            .map_or(true, |record| record.status.is_cancelled())
    }

    fn write_report(&self, job: JobId, path: &Path) -> Result<(), SpoolerError> {
        let report = {
            let state = self.lock();
            let record = state.jobs.get(&job).ok_or(SpoolerError::UnknownJob(job))?;
            SpoolReport {
                job,
                device: record.device.clone(),
                document: record.document.clone(),
                copies: self.settings.copies(),
                color: self.settings.color_mode(),
                duplex: self.settings.duplex(),
                pages: record.pages.clone(),
            }
        };
        let payload = serde_json::to_string_pretty(&report)
            .map_err(|err| SpoolerError::Os(err.to_string()))?;
        fs::write(path, payload)
            .map_err(|err| SpoolerError::Os(format!("{}: {err}", path.display())))
    }
}

impl DeviceContext for VirtualContext {
    fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn reset(&mut self, settings: &DeviceSettingsBlob) -> Result<(), SpoolerError> {
        if self.in_page {
            return Err(SpoolerError::Os("cannot reset a device inside a page".into()));
        }
        self.settings = settings.clone();
        Ok(())
    }

    fn metrics(&self) -> Result<DeviceMetrics, SpoolerError> {
        Ok(self.device.metrics_for(&self.settings))
    }

    fn fonts(&self) -> Result<Vec<String>, SpoolerError> {
        Ok(self.device.fonts.clone())
    }

    fn start_doc(&mut self, doc: &DocInfo) -> Result<StartDoc, SpoolerError> {
        if self.kind != ContextKind::Job {
            return Err(SpoolerError::Os(
                "an information context cannot start a document".into(),
            ));
        }
        if self.job.is_some() {
            return Err(SpoolerError::Os("a document is already open".into()));
        }
        let declined = match self.device.prompt {
            PromptBehavior::Never => false,
            PromptBehavior::Decline => true,
            PromptBehavior::DeclineUnlessRedirected => doc.output_file.is_none(),
        };
        if declined {
            debug!(device = %self.device.name, "start prompt dismissed");
            return Ok(StartDoc::Cancelled);
        }

        let mut state = self.lock();
        let id = JobId(state.next_job);
        state.next_job += 1;
        state.jobs.insert(
            id,
            JobRecord {
                device: self.device.name.clone(),
                document: doc.name.clone(),
                status: JobStatus::SPOOLING | JobStatus::PRINTING,
                pages: Vec::new(),
            },
        );
        drop(state);
        self.job = Some(id);
        self.output_file.clone_from(&doc.output_file);
        Ok(StartDoc::Started(id))
    }

    fn start_page(&mut self) -> Result<(), SpoolerError> {
        self.active_job()?;
        if self.in_page {
            return Err(SpoolerError::Os("a page is already open".into()));
        }
        self.in_page = true;
        Ok(())
    }

    fn end_page(&mut self) -> Result<PageEnd, SpoolerError> {
        let job = self.active_job()?;
        if !self.in_page {
            return Err(SpoolerError::Os("no page is open".into()));
        }
        self.in_page = false;
        if self.job_cancelled(job) {
            return Ok(PageEnd::Cancelled);
        }
        let orientation = self.settings.orientation();
        let size = self
            .device
            .effective_paper_size(&self.settings)
            .oriented(orientation);
        let mut state = self.lock();
        if let Some(record) = state.jobs.get_mut(&job) {
            let number = record.pages.len() as u32 + 1;
            record.pages.push(SpooledPage {
                number,
                orientation,
                size,
            });
        }
        Ok(PageEnd::Finished)
    }

    fn end_doc(&mut self) -> Result<PageEnd, SpoolerError> {
        let job = self.active_job()?;
        if self.in_page {
            return Err(SpoolerError::Os("a page is still open".into()));
        }
        if self.job_cancelled(job) {
            self.job = None;
            return Ok(PageEnd::Cancelled);
        }
        if let Some(path) = self.output_file.take() {
            self.write_report(job, &path)?;
        }
        {
            let mut state = self.lock();
            if let Some(record) = state.jobs.get_mut(&job) {
                record.status.remove(JobStatus::SPOOLING | JobStatus::PRINTING);
                record.status.insert(JobStatus::PRINTED | JobStatus::COMPLETE);
            }
        }
        self.job = None;
        Ok(PageEnd::Finished)
    }

    fn abort_doc(&mut self) -> Result<(), SpoolerError> {
        let Some(job) = self.job.take() else {
            return Ok(());
        };
        self.in_page = false;
        self.output_file = None;
        let mut state = self.lock();
        if let Some(record) = state.jobs.get_mut(&job) {
            record.status.remove(JobStatus::SPOOLING | JobStatus::PRINTING);
            record.status.insert(JobStatus::DELETED);
        }
        Ok(())
    }
}

impl Drop for VirtualContext {
    fn drop(&mut self) {
        if self.job.is_some() {
            warn!(handle = self.handle.0, "context dropped with an open document");
            let _ = self.abort_doc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laser() -> (VirtualSpooler, DeviceSettingsBlob) {
        let spooler = VirtualSpooler::default();
        let settings = spooler.default_settings("Virtual Laser").unwrap();
        (spooler, settings)
    }

    #[test]
    fn unknown_devices_are_reported() {
        let spooler = VirtualSpooler::default();
        assert!(matches!(
            spooler.open_device("Nowhere"),
            Err(SpoolerError::UnknownDevice(_))
        ));
    }

    #[test]
    fn default_settings_are_deterministic() {
        let (spooler, first) = laser();
        let second = spooler.default_settings("Virtual Laser").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.driver_private().len(), 64);
        spooler.validate_settings("Virtual Laser", &first).unwrap();
    }

    #[test]
    fn foreign_blobs_fail_validation() {
        let spooler = VirtualSpooler::default();
        let receipt = spooler.default_settings("Virtual Receipt").unwrap();
        assert!(matches!(
            spooler.validate_settings("Virtual Laser", &receipt),
            Err(SpoolerError::SettingsRejected(_))
        ));
    }

    #[test]
    fn external_delete_cancels_next_page() {
        let (spooler, settings) = laser();
        let mut context = spooler
            .create_context("Virtual Laser", &settings, ContextKind::Job)
            .unwrap();
        let StartDoc::Started(job) = context
            .start_doc(&DocInfo {
                name: "doc".into(),
                output_file: None,
            })
            .unwrap()
        else {
            panic!("job should start");
        };
        context.start_page().unwrap();
        assert_eq!(context.end_page().unwrap(), PageEnd::Finished);
        context.start_page().unwrap();
        spooler
            .control_job("Virtual Laser", job, JobCommand::Delete)
            .unwrap();
        assert_eq!(context.end_page().unwrap(), PageEnd::Cancelled);
        assert!(spooler
            .job_info("Virtual Laser", job)
            .unwrap()
            .status
            .contains(JobStatus::DELETED));
    }

    #[test]
    fn file_port_declines_without_redirection() {
        let spooler = VirtualSpooler::default();
        let settings = spooler.default_settings("Virtual File Port").unwrap();
        let mut context = spooler
            .create_context("Virtual File Port", &settings, ContextKind::Job)
            .unwrap();
        let outcome = context
            .start_doc(&DocInfo {
                name: "doc".into(),
                output_file: None,
            })
            .unwrap();
        assert_eq!(outcome, StartDoc::Cancelled);
        assert!(spooler.jobs().is_empty());
    }

    #[test]
    fn query_contexts_cannot_print() {
        let (spooler, settings) = laser();
        let mut context = spooler
            .create_context("Virtual Laser", &settings, ContextKind::Query)
            .unwrap();
        assert!(context
            .start_doc(&DocInfo {
                name: "doc".into(),
                output_file: None,
            })
            .is_err());
    }

    #[test]
    fn receipt_snaps_custom_paper_to_roll() {
        let spooler = VirtualSpooler::default();
        let mut settings = spooler.default_settings("Virtual Receipt").unwrap();
        let caps = crate::capability::CapabilitySet::derive(&settings);
        settings
            .set_custom_paper_size(caps, SizeTenths::new(580, 2000))
            .unwrap();
        let context = spooler
            .create_context("Virtual Receipt", &settings, ContextKind::Query)
            .unwrap();
        assert_eq!(
            context.device.effective_paper_size(&settings),
            SizeTenths::new(800, 2970)
        );
    }

    #[test]
    fn catalog_rejects_duplicates() {
        let mut catalog = VirtualCatalog::builtin();
        let copy = catalog.devices[0].clone();
        catalog.devices.push(copy);
        assert!(matches!(
            catalog.check(),
            Err(CatalogError::DuplicateDevice(_))
        ));
    }
}
