use propshield_intercept::HookError;
use thiserror::Error;

use crate::hooks::InstallReport;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("cannot open {library}: {source}")]
    LibraryUnavailable {
        library: &'static str,
        #[source]
        source: HookError,
    },

    #[error("no property hook could be staged")]
    NothingStaged(InstallReport),

    #[error("hook commit rejected, nothing installed")]
    CommitRejected(InstallReport),
}

impl InstallError {
    /// Per-binding states at the point installation stopped, when staging was reached.
    pub fn report(&self) -> Option<&InstallReport> {
        match self {
            InstallError::LibraryUnavailable { .. } => None,
            InstallError::NothingStaged(report) | InstallError::CommitRejected(report) => Some(report),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
