use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{PrintError, PrintResult};
use crate::settings::{DeviceSettingsBlob, MediaTypeId, PaperId, PaperSourceId};
use crate::units::{DeviceMetrics, SizeTenths};

/// Failure reported by the native print subsystem.
/// 原生列印子系統回報的失敗。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpoolerError {
    #[error("unknown device `{0}`")]
    UnknownDevice(String),
    #[error("access to device `{0}` was denied")]
    AccessDenied(String),
    #[error("job {0} does not exist")]
    UnknownJob(JobId),
    #[error("settings rejected by driver: {0}")]
    SettingsRejected(String),
    #[error("{0}")]
    Os(String),
}

/// Spooler-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Opaque identity of a native rendering-surface handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

bitflags! {
    /// Status bits the spooler reports for a job.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct JobStatus: u32 {
        const PAUSED = 1 << 0;
        const ERROR = 1 << 1;
        const DELETING = 1 << 2;
        const SPOOLING = 1 << 3;
        const PRINTING = 1 << 4;
        const OFFLINE = 1 << 5;
        const PAPER_OUT = 1 << 6;
        const PRINTED = 1 << 7;
        const DELETED = 1 << 8;
        const BLOCKED = 1 << 9;
        const USER_INTERVENTION = 1 << 10;
        const RESTARTED = 1 << 11;
        const COMPLETE = 1 << 12;
        const RETAINED = 1 << 13;
        const QUEUED = 1 << 14;
    }
}

impl JobStatus {
    /// True once the job can no longer produce output.
    pub fn is_cancelled(self) -> bool {
        self.intersects(JobStatus::DELETING | JobStatus::DELETED)
    }
}

/// Out-of-band control request for an existing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCommand {
    Pause,
    Resume,
    Restart,
    Cancel,
    Delete,
    Retain,
    Release,
}

/// Snapshot of a job as the spooler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub device: String,
    pub document: String,
    pub status: JobStatus,
    pub pages_printed: u32,
}

/// Whether a context may only answer queries or may also run a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Query,
    Job,
}

/// Parameters for starting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    pub name: String,
    /// Redirects spooled output to a file instead of the device port.
    pub output_file: Option<PathBuf>,
}

/// Result of asking the device to start a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDoc {
    Started(JobId),
    /// The user dismissed an interactive driver prompt.
    Cancelled,
}

/// Result of finalizing a page or document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    Finished,
    /// The job was cancelled outside this process.
    Cancelled,
}

/// Ranges a driver accepts for scalar settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_copies: u16,
    pub papers: Vec<PaperId>,
    pub paper_sources: Vec<PaperSourceId>,
    pub media_types: Vec<MediaTypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperInfo {
    pub id: PaperId,
    pub name: String,
    /// Portrait-frame dimensions.
    pub size: SizeTenths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSourceInfo {
    pub id: PaperSourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTypeInfo {
    pub id: MediaTypeId,
    pub name: String,
}

/// Abstraction over the native print subsystem.
/// 原生列印子系統的抽象介面。
pub trait Spooler {
    type Context: DeviceContext;

    fn enumerate_devices(&self) -> Result<Vec<String>, SpoolerError>;
    fn default_device(&self) -> Result<Option<String>, SpoolerError>;

    /// Opens and validates a device, returning the ranges its driver accepts.
    fn open_device(&self, device: &str) -> Result<DeviceLimits, SpoolerError>;
    fn default_settings(&self, device: &str) -> Result<DeviceSettingsBlob, SpoolerError>;
    fn validate_settings(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
    ) -> Result<(), SpoolerError>;

    fn paper_sizes(&self, device: &str) -> Result<Vec<PaperInfo>, SpoolerError>;
    fn paper_sources(&self, device: &str) -> Result<Vec<PaperSourceInfo>, SpoolerError>;
    fn media_types(&self, device: &str) -> Result<Vec<MediaTypeInfo>, SpoolerError>;

    fn create_context(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
        kind: ContextKind,
    ) -> Result<Self::Context, SpoolerError>;

    fn job_info(&self, device: &str, job: JobId) -> Result<JobInfo, SpoolerError>;
    fn control_job(&self, device: &str, job: JobId, command: JobCommand)
        -> Result<(), SpoolerError>;
}

/// A native rendering-surface handle bound to one device.
pub trait DeviceContext {
    fn handle(&self) -> SurfaceHandle;
    fn kind(&self) -> ContextKind;

    /// Reapplies settings to the handle. Only valid outside a page.
    fn reset(&mut self, settings: &DeviceSettingsBlob) -> Result<(), SpoolerError>;
    fn metrics(&self) -> Result<DeviceMetrics, SpoolerError>;
    fn fonts(&self) -> Result<Vec<String>, SpoolerError>;

    fn start_doc(&mut self, doc: &DocInfo) -> Result<StartDoc, SpoolerError>;
    fn start_page(&mut self) -> Result<(), SpoolerError>;
    fn end_page(&mut self) -> Result<PageEnd, SpoolerError>;
    fn end_doc(&mut self) -> Result<PageEnd, SpoolerError>;
    fn abort_doc(&mut self) -> Result<(), SpoolerError>;
}

/// Lists the devices the spooler knows about.
pub fn available_devices<S: Spooler>(spooler: &S) -> PrintResult<Vec<String>> {
    spooler
        .enumerate_devices()
        .map_err(|err| PrintError::driver("enumerate devices", err))
}

/// Resolves the user or system default device.
pub fn default_device_name<S: Spooler>(spooler: &S) -> PrintResult<String> {
    match spooler.default_device() {
        Ok(Some(name)) => Ok(name),
        Ok(None) => Err(PrintError::DeviceUnavailable {
            device: String::new(),
            reason: "no default device is configured".into(),
        }),
        Err(err) => Err(PrintError::driver("resolve default device", err)),
    }
}

impl PrintError {
    /// Maps a facade error raised while opening `device`.
    pub(crate) fn from_open(device: &str, err: SpoolerError) -> Self {
        match err {
            SpoolerError::UnknownDevice(_) | SpoolerError::AccessDenied(_) => {
                PrintError::DeviceUnavailable {
                    device: device.to_string(),
                    reason: err.to_string(),
                }
            }
            other => PrintError::driver("open device", other),
        }
    }

    /// Maps a facade error raised while validating settings.
    pub(crate) fn from_validation(err: SpoolerError) -> Self {
        match err {
            SpoolerError::SettingsRejected(reason) => PrintError::InvalidSettings(reason),
            other => PrintError::driver("validate settings", other),
        }
    }
}
