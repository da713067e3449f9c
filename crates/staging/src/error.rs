//! Error types for binary staging.

use std::io;

use thiserror::Error;

/// Result type for staging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while staging the daemon binary.
#[derive(Debug, Error)]
pub enum Error {
    /// The packaged daemon binary could not be located in the asset source.
    ///
    /// Retrying will not help until the host resolves the packaging problem.
    #[error("daemon asset missing: {0}")]
    AssetMissing(String),

    /// The packaged daemon binary exists but could not be read.
    #[error("failed to read daemon asset ({0}): {1}")]
    ReadFailed(&'static str, #[source] io::Error),

    /// The staged binary could not be written, verified, or made executable.
    #[error("failed to stage daemon binary ({0}): {1}")]
    WriteFailed(&'static str, #[source] io::Error),
}
