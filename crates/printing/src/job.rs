use std::fmt;

use crate::error::{PrintError, PrintResult};
use crate::spooler::JobId;

/// Lifecycle state of the session's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Idle,
    Printing,
    /// The last job was aborted; a new one may begin.
    Aborted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Idle => "idle",
            JobState::Printing => "printing",
            JobState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Outcome of a job or page transition.
///
/// `Declined` is an expected condition (the job was cancelled by the user or
/// outside this process), not an error.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Proceeded,
    Declined,
}

impl Outcome {
    pub fn proceeded(self) -> bool {
        self == Outcome::Proceeded
    }
}

/// Job/page state machine. Native calls are driven by the session; this type
/// only owns the transitions and their contract checks.
#[derive(Debug, Clone)]
pub struct JobController {
    state: JobState,
    page: u32,
    job_id: Option<JobId>,
    document: Option<String>,
}

impl Default for JobController {
    fn default() -> Self {
        Self::new()
    }
}

impl JobController {
    pub const fn new() -> Self {
        Self {
            state: JobState::Idle,
            page: 0,
            job_id: None,
            document: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_printing(&self) -> bool {
        self.state == JobState::Printing
    }

    /// Current page number; 1 right after a job starts.
    pub fn page_number(&self) -> u32 {
        self.page
    }

    /// Identifier of the current or most recent job.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn ensure_can_begin(&self) -> PrintResult<()> {
        match self.state {
            JobState::Printing => Err(PrintError::AlreadyPrinting),
            JobState::Idle | JobState::Aborted => Ok(()),
        }
    }

    pub fn ensure_printing(&self) -> PrintResult<()> {
        if self.is_printing() {
            Ok(())
        } else {
            Err(PrintError::NotPrinting)
        }
    }

    pub(crate) fn started(&mut self, job_id: JobId, document: &str) {
        debug_assert!(!self.is_printing());
        self.state = JobState::Printing;
        self.page = 1;
        self.job_id = Some(job_id);
        self.document = Some(document.to_string());
    }

    pub(crate) fn page_advanced(&mut self) {
        debug_assert!(self.is_printing());
        self.page += 1;
    }

    pub(crate) fn finished(&mut self) {
        self.state = JobState::Idle;
    }

    /// Moves a printing job to `Aborted`. Returns false when nothing was running.
    pub(crate) fn aborted(&mut self) -> bool {
        if self.is_printing() {
            self.state = JobState::Aborted;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_refused_while_printing() {
        let mut controller = JobController::new();
        controller.ensure_can_begin().unwrap();
        controller.started(JobId(4), "report");
        assert!(matches!(
            controller.ensure_can_begin(),
            Err(PrintError::AlreadyPrinting)
        ));
        assert_eq!(controller.page_number(), 1);
    }

    #[test]
    fn page_operations_require_printing() {
        let controller = JobController::new();
        let err = controller.ensure_printing().unwrap_err();
        assert!(err.is_state_violation());
    }

    #[test]
    fn abort_from_idle_is_a_no_op() {
        let mut controller = JobController::new();
        assert!(!controller.aborted());
        assert_eq!(controller.state(), JobState::Idle);
    }

    #[test]
    fn aborted_job_can_restart_with_fresh_counter() {
        let mut controller = JobController::new();
        controller.started(JobId(1), "first");
        controller.page_advanced();
        controller.page_advanced();
        assert_eq!(controller.page_number(), 3);
        assert!(controller.aborted());
        assert_eq!(controller.state(), JobState::Aborted);
        assert!(!controller.aborted());

        controller.ensure_can_begin().unwrap();
        controller.started(JobId(2), "second");
        assert_eq!(controller.page_number(), 1);
        assert_eq!(controller.job_id(), Some(JobId(2)));
    }
}
