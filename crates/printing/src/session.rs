//! Printer session: one device, its settings, and at most one live handle.
//! 印表機工作階段：單一裝置、其設定，以及至多一個作用中的繪圖控制代碼。

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::capability::{Capability, CapabilitySet};
use crate::config::{ResyncPolicy, SessionConfig};
use crate::error::{PrintError, PrintResult};
use crate::job::{JobController, JobState, Outcome};
use crate::settings::{
    acquire_default, ColorMode, DeviceSettingsBlob, DuplexMode, MediaTypeId, Orientation,
    PaperId, PaperSourceId,
};
use crate::spooler::{
    default_device_name, ContextKind, DeviceContext, DeviceLimits, DocInfo, JobCommand, JobId,
    JobInfo, MediaTypeInfo, PageEnd, PaperInfo, PaperSourceInfo, Spooler, SpoolerError,
    StartDoc,
};
use crate::surface::{DrawContext, DrawingSurface, NoSurface, PreDrawCheck, SurfaceBinder};
use crate::units::{
    Anchor, DeviceMetrics, LogicalMapping, LogicalUnit, Margins, RectTenths, Resolution,
    SizeTenths,
};

/// The job-capable handle plus the orientation last applied to it.
struct LiveContext<X> {
    context: X,
    orientation: Orientation,
}

/// Everything acquired when a device is opened.
struct OpenedDevice {
    limits: DeviceLimits,
    settings: DeviceSettingsBlob,
    caps: CapabilitySet,
    metrics: DeviceMetrics,
}

impl OpenedDevice {
    fn open<S: Spooler>(spooler: &S, device: &str) -> PrintResult<Self> {
        let limits = spooler
            .open_device(device)
            .map_err(|err| PrintError::from_open(device, err))?;
        let settings = acquire_default(spooler, device)?;
        let caps = CapabilitySet::derive(&settings);
        let metrics = spooler
            .create_context(device, &settings, ContextKind::Query)
            .and_then(|context| context.metrics())
            .map_err(|err| PrintError::from_open(device, err))?
            .oriented(settings.orientation());
        Ok(Self {
            limits,
            settings,
            caps,
            metrics,
        })
    }
}

/// A session against one named output device.
///
/// Settings changes made while a job runs are held as pending and pushed to
/// the live handle at the next page boundary. Dropping the session aborts any
/// job in flight.
pub struct PrinterSession<S: Spooler, C: DrawingSurface = NoSurface> {
    spooler: S,
    device: String,
    settings: DeviceSettingsBlob,
    caps: CapabilitySet,
    limits: DeviceLimits,
    config: SessionConfig,
    pending: Option<DeviceSettingsBlob>,
    native_dpi: Resolution,
    live: Option<LiveContext<S::Context>>,
    controller: JobController,
    binder: SurfaceBinder<C>,
}

impl<S: Spooler> PrinterSession<S, NoSurface> {
    /// Opens `device` with a session that only queries geometry or spools
    /// blank pages.
    pub fn open(spooler: S, device: &str, config: SessionConfig) -> PrintResult<Self> {
        Self::open_with_surface(spooler, device, config, NoSurface)
    }

    /// Opens the configured default device, or the spooler's default.
    pub fn open_default(spooler: S, config: SessionConfig) -> PrintResult<Self> {
        let device = match config.default_device.clone() {
            Some(name) => name,
            None => default_device_name(&spooler)?,
        };
        Self::open(spooler, &device, config)
    }
}

impl<S: Spooler, C: DrawingSurface> PrinterSession<S, C> {
    pub fn open_with_surface(
        spooler: S,
        device: &str,
        config: SessionConfig,
        consumer: C,
    ) -> PrintResult<Self> {
        let opened = OpenedDevice::open(&spooler, device)?;
        let mut binder = SurfaceBinder::new(consumer, config.logical_unit, config.anchor);
        binder.refresh(&opened.metrics);
        info!(
            device,
            capabilities = ?opened.caps,
            dpi_x = opened.metrics.dpi.x,
            dpi_y = opened.metrics.dpi.y,
            "printer session opened"
        );
        Ok(Self {
            spooler,
            device: device.to_string(),
            settings: opened.settings,
            caps: opened.caps,
            limits: opened.limits,
            config,
            pending: None,
            native_dpi: opened.metrics.dpi,
            live: None,
            controller: JobController::new(),
            binder,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Re-opens the session onto another device. Settings and capabilities
    /// are reacquired from the new driver.
    pub fn select_device(&mut self, device: &str) -> PrintResult<()> {
        self.controller.ensure_can_begin()?;
        let opened = OpenedDevice::open(&self.spooler, device)?;
        self.device = device.to_string();
        self.settings = opened.settings;
        self.caps = opened.caps;
        self.limits = opened.limits;
        self.pending = None;
        self.native_dpi = opened.metrics.dpi;
        self.controller = JobController::new();
        self.binder.refresh(&opened.metrics);
        info!(device, "session moved to another device");
        Ok(())
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn spooler(&self) -> &S {
        &self.spooler
    }

    /// Current settings, including changes not yet pushed to a live job.
    pub fn settings(&self) -> &DeviceSettingsBlob {
        &self.settings
    }

    pub fn has_pending_settings(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolution measured when the device was opened, in the feed frame.
    pub fn native_resolution(&self) -> Resolution {
        self.native_dpi
    }

    /// Validates `blob` with the driver and merges its present fields.
    pub fn set_settings(&mut self, blob: &DeviceSettingsBlob) -> PrintResult<()> {
        self.spooler
            .validate_settings(&self.device, blob)
            .map_err(PrintError::from_validation)?;
        let merged = crate::settings::merge(&self.settings, blob)?;
        self.settings = merged;
        self.mark_pending();
        Ok(())
    }

    /// Opaque exchange form of the current settings.
    pub fn settings_bytes(&self) -> Vec<u8> {
        self.settings.to_bytes()
    }

    pub fn set_settings_bytes(&mut self, bytes: &[u8]) -> PrintResult<()> {
        let blob = DeviceSettingsBlob::from_bytes(bytes)?;
        self.set_settings(&blob)
    }

    fn mark_pending(&mut self) {
        self.pending = Some(self.settings.clone());
    }

    fn require(&self, capability: Capability) -> PrintResult<()> {
        if self.caps.supports(capability) {
            Ok(())
        } else {
            Err(PrintError::UnsupportedCapability(capability))
        }
    }

    pub fn copies(&self) -> PrintResult<u16> {
        self.require(Capability::Copies)?;
        Ok(self.settings.copies())
    }

    pub fn set_copies(&mut self, copies: u16) -> PrintResult<()> {
        self.settings.set_copies(self.caps, &self.limits, copies)?;
        self.mark_pending();
        Ok(())
    }

    pub fn duplex(&self) -> PrintResult<DuplexMode> {
        self.require(Capability::Duplex)?;
        Ok(self.settings.duplex())
    }

    pub fn set_duplex(&mut self, duplex: DuplexMode) -> PrintResult<()> {
        self.settings.set_duplex(self.caps, duplex)?;
        self.mark_pending();
        Ok(())
    }

    pub fn collate(&self) -> PrintResult<bool> {
        self.require(Capability::Collate)?;
        Ok(self.settings.collate())
    }

    pub fn set_collate(&mut self, collate: bool) -> PrintResult<()> {
        self.settings.set_collate(self.caps, collate)?;
        self.mark_pending();
        Ok(())
    }

    pub fn color_mode(&self) -> PrintResult<ColorMode> {
        self.require(Capability::Color)?;
        Ok(self.settings.color_mode())
    }

    pub fn set_color_mode(&mut self, color: ColorMode) -> PrintResult<()> {
        self.settings.set_color_mode(self.caps, color)?;
        self.mark_pending();
        Ok(())
    }

    pub fn orientation(&self) -> PrintResult<Orientation> {
        self.require(Capability::Orientation)?;
        Ok(self.settings.orientation())
    }

    pub fn set_orientation(&mut self, orientation: Orientation) -> PrintResult<()> {
        self.settings.set_orientation(self.caps, orientation)?;
        self.mark_pending();
        Ok(())
    }

    /// Scale in percent.
    pub fn scale(&self) -> PrintResult<u16> {
        self.require(Capability::Scale)?;
        Ok(self.settings.scale())
    }

    pub fn set_scale(&mut self, percent: u16) -> PrintResult<()> {
        self.settings.set_scale(self.caps, percent)?;
        self.mark_pending();
        Ok(())
    }

    pub fn paper_source(&self) -> PrintResult<PaperSourceId> {
        self.require(Capability::PaperSource)?;
        Ok(self.settings.paper_source())
    }

    pub fn set_paper_source(&mut self, source: PaperSourceId) -> PrintResult<()> {
        self.settings
            .set_paper_source(self.caps, &self.limits, source)?;
        self.mark_pending();
        Ok(())
    }

    pub fn paper_size(&self) -> PrintResult<PaperId> {
        self.require(Capability::PaperSize)?;
        Ok(self.settings.paper())
    }

    pub fn set_paper_size(&mut self, paper: PaperId) -> PrintResult<()> {
        self.settings.set_paper(self.caps, &self.limits, paper)?;
        self.mark_pending();
        Ok(())
    }

    /// Requests user-defined dimensions in the portrait frame. The driver may
    /// substitute a standard sheet; [`Self::page_size`] reports what it chose.
    pub fn set_custom_paper_size(&mut self, size: SizeTenths) -> PrintResult<()> {
        self.settings.set_custom_paper_size(self.caps, size)?;
        self.mark_pending();
        Ok(())
    }

    pub fn media_type(&self) -> PrintResult<MediaTypeId> {
        self.require(Capability::MediaType)?;
        Ok(self.settings.media_type())
    }

    pub fn set_media_type(&mut self, media_type: MediaTypeId) -> PrintResult<()> {
        self.settings
            .set_media_type(self.caps, &self.limits, media_type)?;
        self.mark_pending();
        Ok(())
    }

    /// Runs `query` against the live job handle, or against a transient
    /// query-only handle built from the current settings when idle.
    fn with_context<T>(
        &self,
        operation: &'static str,
        query: impl FnOnce(&S::Context, Orientation) -> Result<T, SpoolerError>,
    ) -> PrintResult<T> {
        let result = match &self.live {
            Some(live) => query(&live.context, live.orientation),
            None => self
                .spooler
                .create_context(&self.device, &self.settings, ContextKind::Query)
                .and_then(|context| query(&context, self.settings.orientation())),
        };
        result.map_err(|err| PrintError::driver(operation, err))
    }

    /// Device metrics in the frame the application draws in.
    pub fn metrics(&self) -> PrintResult<DeviceMetrics> {
        self.with_context("query device metrics", |context, orientation| {
            context.metrics().map(|metrics| metrics.oriented(orientation))
        })
    }

    /// Whole sheet, in tenths of a millimetre.
    pub fn page_size(&self) -> PrintResult<SizeTenths> {
        self.metrics().map(|metrics| metrics.page_size())
    }

    /// Non-printable border, in tenths of a millimetre.
    pub fn margins(&self) -> PrintResult<Margins> {
        self.metrics().map(|metrics| metrics.margins())
    }

    pub fn printable_area(&self) -> PrintResult<RectTenths> {
        self.metrics().map(|metrics| metrics.printable_area())
    }

    /// Dots per inch along the drawing axes.
    pub fn resolution(&self) -> PrintResult<Resolution> {
        self.metrics().map(|metrics| metrics.dpi)
    }

    pub fn fonts(&self) -> PrintResult<Vec<String>> {
        self.with_context("enumerate fonts", |context, _| context.fonts())
    }

    /// Sheets the driver offers. Enumerations are answered per device, so
    /// they are the same while idle and during a job.
    pub fn paper_sizes(&self) -> PrintResult<Vec<PaperInfo>> {
        self.spooler
            .paper_sizes(&self.device)
            .map_err(|err| PrintError::driver("enumerate paper sizes", err))
    }

    pub fn paper_sources(&self) -> PrintResult<Vec<PaperSourceInfo>> {
        self.spooler
            .paper_sources(&self.device)
            .map_err(|err| PrintError::driver("enumerate paper sources", err))
    }

    pub fn media_types(&self) -> PrintResult<Vec<MediaTypeInfo>> {
        self.spooler
            .media_types(&self.device)
            .map_err(|err| PrintError::driver("enumerate media types", err))
    }

    pub fn job_state(&self) -> JobState {
        self.controller.state()
    }

    pub fn page_number(&self) -> u32 {
        self.controller.page_number()
    }

    /// Identifier of the current or most recent job.
    pub fn job_id(&self) -> Option<JobId> {
        self.controller.job_id()
    }

    /// Starts a job and its first page.
    ///
    /// Returns `Declined` when the device-side start was dismissed by the
    /// user; the handle is released and the controller state is unchanged.
    pub fn begin_job(&mut self, name: &str, output_file: Option<PathBuf>) -> PrintResult<Outcome> {
        self.controller.ensure_can_begin()?;
        let mut context = self
            .spooler
            .create_context(&self.device, &self.settings, ContextKind::Job)
            .map_err(PrintError::JobStartFailed)?;
        let doc = DocInfo {
            name: name.to_string(),
            output_file,
        };
        let job = match context.start_doc(&doc).map_err(PrintError::JobStartFailed)? {
            StartDoc::Started(job) => job,
            StartDoc::Cancelled => {
                info!(device = %self.device, document = name, "job start declined");
                return Ok(Outcome::Declined);
            }
        };

        self.pending = None;
        self.live = Some(LiveContext {
            context,
            orientation: self.settings.orientation(),
        });
        self.controller.started(job, name);
        info!(device = %self.device, %job, document = name, "print job started");

        let result = self.open_page().map(|()| Outcome::Proceeded);
        self.abort_on_error(result)
    }

    /// Finishes the current page and starts the next one.
    pub fn new_page(&mut self) -> PrintResult<Outcome> {
        self.controller.ensure_printing()?;
        let result = self.advance_page();
        self.abort_on_error(result)
    }

    fn advance_page(&mut self) -> PrintResult<Outcome> {
        if self.close_page()? == PageEnd::Cancelled {
            return Ok(self.decline("page could not be finalized"));
        }
        self.resync()?;
        self.open_page()?;
        self.controller.page_advanced();
        debug!(page = self.controller.page_number(), "page started");
        Ok(Outcome::Proceeded)
    }

    /// Finishes the last page and the document, releasing the handle.
    pub fn end_doc(&mut self) -> PrintResult<Outcome> {
        self.controller.ensure_printing()?;
        let result = self.finish_doc();
        self.abort_on_error(result)
    }

    fn finish_doc(&mut self) -> PrintResult<Outcome> {
        if self.close_page()? == PageEnd::Cancelled {
            return Ok(self.decline("final page could not be finalized"));
        }
        let live = self.live.as_mut().ok_or(PrintError::NotPrinting)?;
        let end = live
            .context
            .end_doc()
            .map_err(|err| PrintError::driver("end document", err))?;
        if end == PageEnd::Cancelled {
            return Ok(self.decline("document could not be finalized"));
        }
        self.live = None;
        self.controller.finished();
        info!(
            device = %self.device,
            pages = self.controller.page_number(),
            "print job finished"
        );
        Ok(Outcome::Proceeded)
    }

    /// Cancels the job in flight, if any. Never fails.
    pub fn abort(&mut self) {
        self.binder.unbind();
        if let Some(mut live) = self.live.take() {
            if let Err(err) = live.context.abort_doc() {
                warn!(device = %self.device, error = %err, "device cancel failed during abort");
            }
        }
        if self.controller.aborted() {
            info!(
                device = %self.device,
                page = self.controller.page_number(),
                "print job aborted"
            );
        }
    }

    fn abort_on_error<T>(&mut self, result: PrintResult<T>) -> PrintResult<T> {
        if let Err(err) = &result {
            warn!(device = %self.device, error = %err, "aborting job after failure");
            self.abort();
        }
        result
    }

    fn decline(&mut self, reason: &'static str) -> Outcome {
        warn!(device = %self.device, reason, "job declined");
        self.abort();
        Outcome::Declined
    }

    fn open_page(&mut self) -> PrintResult<()> {
        let live = self.live.as_mut().ok_or(PrintError::NotPrinting)?;
        live.context
            .start_page()
            .map_err(|err| PrintError::driver("start page", err))?;
        let metrics = live
            .context
            .metrics()
            .map_err(|err| PrintError::driver("query device metrics", err))?
            .oriented(live.orientation);
        self.binder.bind(live.context.handle(), &metrics)
    }

    fn close_page(&mut self) -> PrintResult<PageEnd> {
        self.binder.unbind();
        let live = self.live.as_mut().ok_or(PrintError::NotPrinting)?;
        live.context
            .end_page()
            .map_err(|err| PrintError::driver("end page", err))
    }

    /// Pushes settings to the live handle between pages.
    fn resync(&mut self) -> PrintResult<()> {
        let blob = match (self.pending.take(), self.config.resync) {
            (Some(blob), _) => blob,
            (None, ResyncPolicy::Eager) => self.settings.clone(),
            (None, ResyncPolicy::Lazy) => return Ok(()),
        };
        let live = self.live.as_mut().ok_or(PrintError::NotPrinting)?;
        live.context
            .reset(&blob)
            .map_err(|err| PrintError::driver("reset device", err))?;
        live.orientation = blob.orientation();
        debug!(orientation = ?live.orientation, "settings reapplied to live handle");
        Ok(())
    }

    /// Switches the drawing unit, re-reading the device extents.
    pub fn set_logical_unit(&mut self, unit: LogicalUnit, anchor: Anchor) -> PrintResult<()> {
        let metrics = self.metrics()?;
        self.binder.set_logical_unit(unit, anchor, &metrics);
        Ok(())
    }

    pub fn logical_unit(&self) -> LogicalUnit {
        self.binder.unit()
    }

    /// Vertical logical units per inch for the active unit.
    pub fn units_per_inch(&self) -> f64 {
        self.binder.units_per_inch()
    }

    pub fn mapping(&self) -> Option<&LogicalMapping> {
        self.binder.mapping()
    }

    pub fn set_pre_draw_check(&mut self, check: PreDrawCheck) {
        self.binder.set_pre_draw_check(check);
    }

    pub fn reset_pre_draw_check(&mut self) {
        self.binder.reset_pre_draw_check();
    }

    /// Hands the bound consumer to `draw` once the pre-draw check passes.
    pub fn draw<R>(&mut self, draw: impl FnOnce(&mut C, &LogicalMapping) -> R) -> PrintResult<R> {
        let context = DrawContext {
            state: self.controller.state(),
            page: self.controller.page_number(),
            bound: self.binder.is_bound(),
        };
        self.binder.draw(context, draw)
    }

    pub fn consumer(&self) -> &C {
        self.binder.consumer()
    }

    /// Spooler view of the current or most recent job.
    pub fn job_status(&self) -> PrintResult<Option<JobInfo>> {
        let Some(job) = self.controller.job_id() else {
            return Ok(None);
        };
        self.spooler
            .job_info(&self.device, job)
            .map(Some)
            .map_err(|err| PrintError::driver("query job", err))
    }

    pub fn control_job(&self, command: JobCommand) -> PrintResult<()> {
        let job = self.controller.job_id().ok_or(PrintError::NotPrinting)?;
        self.spooler
            .control_job(&self.device, job, command)
            .map_err(|err| PrintError::driver("control job", err))
    }
}

impl<S: Spooler, C: DrawingSurface> Drop for PrinterSession<S, C> {
    fn drop(&mut self) {
        self.abort();
    }
}
