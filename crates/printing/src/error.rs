use thiserror::Error;

use crate::capability::Capability;
use crate::spooler::SpoolerError;

/// Errors surfaced by printer sessions.
/// 印表機工作階段回報的錯誤。
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("device `{device}` is unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("device does not support {0}")]
    UnsupportedCapability(Capability),
    #[error("invalid {what}: {detail}")]
    InvalidArgument { what: &'static str, detail: String },
    #[error("invalid settings blob: {0}")]
    InvalidSettings(String),
    #[error("a print job is already in progress")]
    AlreadyPrinting,
    #[error("no print job is in progress")]
    NotPrinting,
    #[error("drawing surface is already bound")]
    AlreadyBound,
    #[error("drawing surface is not bound")]
    NotBound,
    #[error("failed to start print job: {0}")]
    JobStartFailed(#[source] SpoolerError),
    #[error("{operation} failed: {message}")]
    Driver {
        operation: &'static str,
        message: String,
    },
}

impl PrintError {
    pub(crate) fn invalid_argument(what: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            what,
            detail: detail.into(),
        }
    }

    /// Wraps a facade failure, keeping the operation name for context.
    pub(crate) fn driver(operation: &'static str, err: SpoolerError) -> Self {
        Self::Driver {
            operation,
            message: err.to_string(),
        }
    }

    /// True for contract violations (calling an operation in the wrong state).
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPrinting | Self::NotPrinting | Self::AlreadyBound | Self::NotBound
        )
    }
}

pub type PrintResult<T> = Result<T, PrintError>;
