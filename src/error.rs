//! Error taxonomy and process exit statuses.
//!
//! Each component reports failures through its own error type. The pipeline
//! folds them into [`RunError`], which knows which [`ExitStatus`] the binary
//! should terminate with. The status codes keep "the request was invalid",
//! "the infrastructure failed" and "the tests failed" apart so CI callers can
//! tell them apart without parsing output.

use std::process::ExitCode;

use crate::artifact::ArtifactError;
use crate::dispatch::DispatchError;

/// A request that cannot be turned into a job.
///
/// Raised for unknown device or test names, unsupported device/test pairings,
/// unknown or invalid parameters, missing artifact slots, bad timeouts and
/// malformed build metadata. The message always names the offending
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidArgument(pub String);

impl InvalidArgument {
    /// Creates an error from anything printable.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Everything that can abort a run before a verdict exists.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The request was rejected before any work was done.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgument),

    /// An artifact could not be resolved.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The execution engine could not be started or supervised.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Writing one of the side outputs (log, results) failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// The exit status this error should terminate the process with.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            RunError::InvalidArgument(_) => ExitStatus::Usage,
            _ => ExitStatus::Infrastructure,
        }
    }
}

/// Process exit statuses.
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | All observed test cases passed |
/// | 1 | Tests ran and at least one did not pass |
/// | 2 | The request was invalid |
/// | 3 | Artifact resolution, dispatch or I/O failed |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    TestsFailed,
    Usage,
    Infrastructure,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::TestsFailed => 1,
            ExitStatus::Usage => 2,
            ExitStatus::Infrastructure => 3,
        }
    }

    /// Maps a result aggregator verdict (`0` or `1`) to a status.
    pub fn from_verdict(ret: i32) -> Self {
        if ret == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::TestsFailed
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_maps_to_usage() {
        let err = RunError::from(InvalidArgument::new("unknown device 'nope'"));
        assert_eq!(err.exit_status(), ExitStatus::Usage);
        assert_eq!(err.exit_status().code(), 2);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_artifact_error_maps_to_infrastructure() {
        let err = RunError::from(ArtifactError::NotFound("/missing/bzImage".to_string()));
        assert_eq!(err.exit_status(), ExitStatus::Infrastructure);
    }

    #[test]
    fn test_verdict_statuses_are_distinct_from_errors() {
        assert_eq!(ExitStatus::from_verdict(0).code(), 0);
        assert_eq!(ExitStatus::from_verdict(1).code(), 1);
        assert_ne!(ExitStatus::TestsFailed.code(), ExitStatus::Usage.code());
        assert_ne!(
            ExitStatus::TestsFailed.code(),
            ExitStatus::Infrastructure.code()
        );
    }
}
