//! Error types for process control operations.

use std::io;

use thiserror::Error;

/// Result type for process control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching or controlling the daemon process.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS refused to create the daemon process.
    #[error("failed to execute daemon binary: {0}")]
    ExecFailed(#[source] io::Error),

    /// IO error.
    #[error("io error ({0}): {1}")]
    Io(&'static str, #[source] io::Error),

    /// The spawned process reported no pid.
    #[error("no pid available for spawned process")]
    MissingPid,

    /// A signal could not be delivered to the daemon process.
    #[error("failed to signal process {0}: {1}")]
    Signal(u32, #[source] nix::errno::Errno),

    /// The daemon process did not exit within the termination deadline.
    #[error("timed out waiting for process {0} to exit")]
    ShutdownTimeout(u32),

    /// Native process control could not be initialized on this host.
    #[error("native process control unavailable: {0}")]
    Unsupported(String),
}
