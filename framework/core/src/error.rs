use std::path::PathBuf;
use std::process::ExitStatus;

use crate::shutdown::StopRequested;

/// Result type used by the harness libraries.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Every failure the harness can report.
///
/// Per-partition verification failures are collected before [`HarnessError::PartitionMismatch`] is
/// raised. Everything else is raised as soon as it happens, because a failed external step
/// invalidates whatever would have been checked after it.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The named entry is not present in the build artifact.
    #[error("Entry '{entry}' not found in build artifact '{artifact}'")]
    Extraction { artifact: PathBuf, entry: String },

    /// The sparse-to-raw converter failed or produced an image that is still sparse.
    #[error("Failed to convert sparse image '{image}': {reason}")]
    Conversion { image: PathBuf, reason: String },

    /// The payload manifest could not be read.
    #[error("Failed to read payload manifest from '{payload}': {reason}")]
    Manifest { payload: PathBuf, reason: String },

    #[error("Build artifact '{0}' does not exist")]
    ArtifactNotFound(PathBuf),

    #[error("Build artifact '{0}' is neither a directory nor a zip archive")]
    UnsupportedArtifact(PathBuf),

    /// The differential-application engine exited with a nonzero status. Fatal for the whole run.
    #[error("Patch engine failed with {status}")]
    PatchEngine { status: ExitStatus },

    #[error("{} partition(s) failed verification: {}", partitions.len(), partitions.join(", "))]
    PartitionMismatch { partitions: Vec<String> },

    /// The final uninterrupted update did not report success.
    #[error("Update did not complete: {reason}")]
    IncompleteUpdate { reason: String },

    /// A subordinate process exited on its own with a nonzero status.
    #[error("'{command}' failed with {status}")]
    SubordinateFailed { command: String, status: ExitStatus },

    /// A remote shell command that must succeed did not.
    #[error("Remote command '{command}' failed: {reason}")]
    RemoteCommand { command: String, reason: String },

    #[error("{0}")]
    ToolNotFound(String),

    /// Work was wound down because a stop was requested.
    #[error("{0}")]
    Stopped(#[from] StopRequested),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context message to an [`std::io::Result`], turning it into a [`HarnessResult`].
pub trait IoResultExt<T> {
    fn io_context<C, F>(self, context: F) -> HarnessResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<C, F>(self, context: F) -> HarnessResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| HarnessError::io(context(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_mismatch_names_every_partition() {
        let err = HarnessError::PartitionMismatch {
            partitions: vec!["system".to_string(), "vendor".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "2 partition(s) failed verification: system, vendor"
        );
    }

    #[test]
    fn test_stopped_keeps_stop_request_as_source() {
        let err = HarnessError::from(StopRequested::default());

        assert_eq!(err.to_string(), "Cancelled by stop request");
        assert!(std::error::Error::source(&err)
            .is_some_and(|source| source.is::<StopRequested>()));
    }

    #[test]
    fn test_io_context_keeps_source() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = result.io_context(|| "Failed to open image").unwrap_err();
        assert_eq!(err.to_string(), "Failed to open image: gone");
        assert!(std::error::Error::source(&err).is_some());
    }
}
