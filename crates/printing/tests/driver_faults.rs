use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quire_printing::{
    ContextKind, DeviceContext, DeviceLimits, DeviceMetrics, DeviceSettingsBlob, DocInfo,
    JobCommand, JobId, JobInfo, JobState, JobStatus, MediaTypeInfo, Orientation, PageEnd,
    PaperInfo, PaperSourceInfo, PrintError, PrinterSession, ResyncPolicy, SessionConfig, Spooler,
    SpoolerError, StartDoc, SurfaceHandle, VirtualContext, VirtualSpooler,
};

const LASER: &str = "Virtual Laser";

#[derive(Debug, Default)]
struct Counters {
    resets: AtomicUsize,
    released_jobs: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    abort_doc: bool,
    end_page: bool,
}

/// Virtual spooler whose job handles count resets and can fail on demand.
struct FaultySpooler {
    inner: VirtualSpooler,
    counters: Arc<Counters>,
    faults: Faults,
}

impl FaultySpooler {
    fn new(faults: Faults) -> Self {
        Self {
            inner: VirtualSpooler::default(),
            counters: Arc::new(Counters::default()),
            faults,
        }
    }

    fn resets(&self) -> usize {
        self.counters.resets.load(Ordering::SeqCst)
    }

    fn released_jobs(&self) -> usize {
        self.counters.released_jobs.load(Ordering::SeqCst)
    }
}

struct FaultyContext {
    inner: VirtualContext,
    counters: Arc<Counters>,
    faults: Faults,
}

impl Drop for FaultyContext {
    fn drop(&mut self) {
        if self.inner.kind() == ContextKind::Job {
            self.counters.released_jobs.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Spooler for FaultySpooler {
    type Context = FaultyContext;

    fn enumerate_devices(&self) -> Result<Vec<String>, SpoolerError> {
        self.inner.enumerate_devices()
    }

    fn default_device(&self) -> Result<Option<String>, SpoolerError> {
        self.inner.default_device()
    }

    fn open_device(&self, device: &str) -> Result<DeviceLimits, SpoolerError> {
        self.inner.open_device(device)
    }

    fn default_settings(&self, device: &str) -> Result<DeviceSettingsBlob, SpoolerError> {
        self.inner.default_settings(device)
    }

    fn validate_settings(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
    ) -> Result<(), SpoolerError> {
        self.inner.validate_settings(device, settings)
    }

    fn paper_sizes(&self, device: &str) -> Result<Vec<PaperInfo>, SpoolerError> {
        self.inner.paper_sizes(device)
    }

    fn paper_sources(&self, device: &str) -> Result<Vec<PaperSourceInfo>, SpoolerError> {
        self.inner.paper_sources(device)
    }

    fn media_types(&self, device: &str) -> Result<Vec<MediaTypeInfo>, SpoolerError> {
        self.inner.media_types(device)
    }

    fn create_context(
        &self,
        device: &str,
        settings: &DeviceSettingsBlob,
        kind: ContextKind,
    ) -> Result<FaultyContext, SpoolerError> {
        Ok(FaultyContext {
            inner: self.inner.create_context(device, settings, kind)?,
            counters: Arc::clone(&self.counters),
            faults: self.faults,
        })
    }

    fn job_info(&self, device: &str, job: JobId) -> Result<JobInfo, SpoolerError> {
        self.inner.job_info(device, job)
    }

    fn control_job(
        &self,
        device: &str,
        job: JobId,
        command: JobCommand,
    ) -> Result<(), SpoolerError> {
        self.inner.control_job(device, job, command)
    }
}

impl DeviceContext for FaultyContext {
    fn handle(&self) -> SurfaceHandle {
        self.inner.handle()
    }

    fn kind(&self) -> ContextKind {
        self.inner.kind()
    }

    fn reset(&mut self, settings: &DeviceSettingsBlob) -> Result<(), SpoolerError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.reset(settings)
    }

    fn metrics(&self) -> Result<DeviceMetrics, SpoolerError> {
        self.inner.metrics()
    }

    fn fonts(&self) -> Result<Vec<String>, SpoolerError> {
        self.inner.fonts()
    }

    fn start_doc(&mut self, doc: &DocInfo) -> Result<StartDoc, SpoolerError> {
        self.inner.start_doc(doc)
    }

    fn start_page(&mut self) -> Result<(), SpoolerError> {
        self.inner.start_page()
    }

    fn end_page(&mut self) -> Result<PageEnd, SpoolerError> {
        if self.faults.end_page {
            return Err(SpoolerError::Os("paper jam".into()));
        }
        self.inner.end_page()
    }

    fn end_doc(&mut self) -> Result<PageEnd, SpoolerError> {
        self.inner.end_doc()
    }

    fn abort_doc(&mut self) -> Result<(), SpoolerError> {
        if self.faults.abort_doc {
            return Err(SpoolerError::Os("port offline".into()));
        }
        self.inner.abort_doc()
    }
}

fn session(spooler: FaultySpooler, resync: ResyncPolicy) -> PrinterSession<FaultySpooler> {
    let config = SessionConfig {
        resync,
        ..SessionConfig::default()
    };
    PrinterSession::open(spooler, LASER, config).unwrap()
}

fn job_status(session: &PrinterSession<FaultySpooler>, job: JobId) -> JobStatus {
    session
        .spooler()
        .inner
        .jobs()
        .into_iter()
        .find(|info| info.id == job)
        .unwrap()
        .status
}

#[test]
fn abort_swallows_a_failing_device_cancel() {
    let faults = Faults {
        abort_doc: true,
        ..Faults::default()
    };
    let mut session = session(FaultySpooler::new(faults), ResyncPolicy::Lazy);
    assert!(session.begin_job("stuck", None).unwrap().proceeded());
    let job = session.job_id().unwrap();

    session.abort();
    assert_eq!(session.job_state(), JobState::Aborted);
    assert_eq!(session.spooler().released_jobs(), 1);
    assert!(session.mapping().is_none());
    assert!(job_status(&session, job).contains(JobStatus::DELETED));

    assert!(session.begin_job("again", None).unwrap().proceeded());
    assert_eq!(session.page_number(), 1);
}

#[test]
fn drop_releases_the_handle_when_cancel_fails() {
    let faults = Faults {
        abort_doc: true,
        ..Faults::default()
    };
    let spooler = FaultySpooler::new(faults);
    let counters = Arc::clone(&spooler.counters);
    let inner = spooler.inner.clone();
    let job = {
        let mut session = session(spooler, ResyncPolicy::Lazy);
        assert!(session.begin_job("abandoned", None).unwrap().proceeded());
        session.job_id().unwrap()
    };
    assert_eq!(counters.released_jobs.load(Ordering::SeqCst), 1);
    let info = inner.jobs().into_iter().find(|info| info.id == job).unwrap();
    assert!(info.status.contains(JobStatus::DELETED));
}

#[test]
fn page_failure_aborts_and_reports_the_original_error() {
    let faults = Faults {
        abort_doc: true,
        end_page: true,
    };
    let mut session = session(FaultySpooler::new(faults), ResyncPolicy::Lazy);
    assert!(session.begin_job("jammed", None).unwrap().proceeded());

    let err = session.new_page().unwrap_err();
    match err {
        PrintError::Driver { operation, message } => {
            assert_eq!(operation, "end page");
            assert!(message.contains("paper jam"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(session.job_state(), JobState::Aborted);
    assert_eq!(session.spooler().released_jobs(), 1);
    assert!(matches!(session.new_page(), Err(PrintError::NotPrinting)));
}

#[test]
fn eager_policy_resets_at_every_page_boundary() {
    let mut session = session(FaultySpooler::new(Faults::default()), ResyncPolicy::Eager);
    assert!(session.begin_job("eager", None).unwrap().proceeded());
    assert!(session.new_page().unwrap().proceeded());
    assert!(session.new_page().unwrap().proceeded());
    assert!(session.end_doc().unwrap().proceeded());
    assert_eq!(session.spooler().resets(), 2);
}

#[test]
fn lazy_policy_resets_only_after_a_change() {
    let mut session = session(FaultySpooler::new(Faults::default()), ResyncPolicy::Lazy);
    assert!(session.begin_job("lazy", None).unwrap().proceeded());
    assert!(session.new_page().unwrap().proceeded());
    assert_eq!(session.spooler().resets(), 0);

    session.set_orientation(Orientation::Landscape).unwrap();
    assert!(session.new_page().unwrap().proceeded());
    assert!(session.new_page().unwrap().proceeded());
    assert!(session.end_doc().unwrap().proceeded());
    assert_eq!(session.spooler().resets(), 1);
}
