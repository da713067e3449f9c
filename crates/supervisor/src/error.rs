//! Error types for the lifecycle supervisor.

use std::io;
use std::path::PathBuf;

use nodehost_process::ExitInfo;
use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the lifecycle supervisor.
#[derive(Debug, Error)]
pub enum Error {
    /// Another start or stop is still in flight; try again once it settles.
    #[error("another lifecycle operation is already in progress")]
    AlreadyInProgress,

    /// A start was requested while the daemon is running.
    #[error("daemon is already running")]
    AlreadyRunning,

    /// No daemon process is currently held.
    #[error("daemon is not running")]
    NotRunning,

    /// Node configuration paths must be absolute.
    #[error("configuration path is not absolute: {0}")]
    PathNotAbsolute(PathBuf),

    /// IO error.
    #[error("io error ({0}): {1}")]
    Io(&'static str, #[source] io::Error),

    /// Staging the daemon binary failed.
    ///
    /// Distinguishable from launch failures so the host can direct the user
    /// toward a packaging fix rather than a generic retry.
    #[error("staging error: {0}")]
    Staging(#[from] nodehost_staging::Error),

    /// Launching or controlling the daemon process failed.
    #[error("launch error: {0}")]
    Launch(#[from] nodehost_process::Error),

    /// The daemon exited without a stop having been requested.
    #[error("daemon exited unexpectedly ({0})")]
    UnexpectedExit(ExitInfo),
}
