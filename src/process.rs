//! Process introspection seam used to tell Teams sessions apart.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process {pid} has exited")]
    Exited { pid: u32 },

    #[error("access denied to process {pid}")]
    AccessDenied { pid: u32 },

    #[error("failed to query process {pid}: {reason}")]
    Query { pid: u32, reason: String },
}

/// Reads another process's command line and parent.
///
/// Lookups race with process exit; callers treat every error as "unknown".
pub trait ProcessCommandLineReader: Send + Sync {
    fn command_line(&self, pid: u32) -> Result<String, ProcessError>;

    fn parent_id(&self, pid: u32) -> Result<u32, ProcessError>;
}
