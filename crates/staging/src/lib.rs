//! Stages the packaged full-node daemon binary into a writable, executable
//! location on first use.
//!
//! The daemon ships inside a read-only asset bundle keyed by target
//! architecture; it must be copied into the application's private install
//! directory and marked executable before it can be spawned. Staging is
//! idempotent: an already-valid staged binary is reused without any
//! filesystem writes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

pub use error::{Error, Result};

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// File name of the staged daemon binary.
pub static DAEMON_FILE_NAME: &str = "daemon";

/// Subdirectory of the install directory that holds staged binaries.
static BIN_DIR_NAME: &str = "bin";

/// Owner read/write/execute; the binary is private to the host application.
const STAGED_MODE: u32 = 0o700;

/// Read-only access to the packaged daemon binary, keyed by platform
/// identifier.
pub trait AssetSource: Send + Sync + 'static {
    /// Opens a byte stream over the named asset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetMissing`] if no asset exists under `key`, or
    /// [`Error::ReadFailed`] if one exists but cannot be opened.
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>>;
}

/// Asset source backed by a directory of bundled files.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    /// Creates a source reading assets from `root`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl AssetSource for DirAssetSource {
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.root.join(key);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::AssetMissing(key.to_string()))
            }
            Err(e) => Err(Error::ReadFailed("failed to open asset", e)),
        }
    }
}

/// The daemon executable on disk after staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBinary {
    /// Absolute path of the staged executable.
    pub path: PathBuf,

    /// Size of the executable in bytes; always non-zero.
    pub size: u64,
}

/// Returns the asset key for the daemon binary on the current architecture.
///
/// # Errors
///
/// Returns [`Error::AssetMissing`] on architectures the bundle does not
/// cover.
pub fn daemon_asset_key() -> Result<&'static str> {
    if cfg!(target_arch = "aarch64") {
        Ok("daemon-aarch64")
    } else if cfg!(target_arch = "arm") {
        Ok("daemon-armv7")
    } else if cfg!(target_arch = "x86_64") {
        Ok("daemon-x86_64")
    } else {
        Err(Error::AssetMissing(format!(
            "no daemon asset for target arch {}",
            std::env::consts::ARCH
        )))
    }
}

/// Path where the daemon binary is staged under `install_dir`.
#[must_use]
pub fn staged_binary_path(install_dir: &Path) -> PathBuf {
    install_dir.join(BIN_DIR_NAME).join(DAEMON_FILE_NAME)
}

/// Whether a usable staged binary already exists under `install_dir`.
#[must_use]
pub fn staged_binary_present(install_dir: &Path) -> bool {
    verify_staged(&staged_binary_path(install_dir)).is_some()
}

/// Ensures the daemon binary is staged under `install_dir`.
///
/// If a non-empty executable already exists at the target path this returns
/// immediately without touching the filesystem. Otherwise the binary is
/// copied from `source`, marked executable, and verified. Writes happen only
/// under the install directory; the daemon's data directory is never
/// touched.
///
/// # Errors
///
/// Returns [`Error::AssetMissing`] if the source cannot provide the binary
/// for this platform, or [`Error::WriteFailed`] if the target cannot be
/// created, written, or made executable.
pub fn ensure_staged(source: &dyn AssetSource, install_dir: &Path) -> Result<StagedBinary> {
    let target = staged_binary_path(install_dir);

    if let Some(size) = verify_staged(&target) {
        debug!("daemon already staged at {}", target.display());
        return Ok(StagedBinary { path: target, size });
    }

    let key = daemon_asset_key()?;
    info!("staging daemon asset {} to {}", key, target.display());

    let bin_dir = install_dir.join(BIN_DIR_NAME);
    fs::create_dir_all(&bin_dir)
        .map_err(|e| Error::WriteFailed("failed to create install bin directory", e))?;

    let mut reader = source.open(key)?;
    let mut file = File::create(&target)
        .map_err(|e| Error::WriteFailed("failed to create staged binary", e))?;
    std::io::copy(&mut reader, &mut file)
        .map_err(|e| Error::WriteFailed("failed to copy daemon asset", e))?;
    file.sync_all()
        .map_err(|e| Error::WriteFailed("failed to flush staged binary", e))?;
    drop(file);

    fs::set_permissions(&target, fs::Permissions::from_mode(STAGED_MODE))
        .map_err(|e| Error::WriteFailed("failed to mark staged binary executable", e))?;

    verify_staged(&target).map_or_else(
        || {
            Err(Error::WriteFailed(
                "staged binary failed verification",
                std::io::Error::new(std::io::ErrorKind::InvalidData, "empty or not executable"),
            ))
        },
        |size| Ok(StagedBinary { path: target, size }),
    )
}

/// Returns the binary size if `path` holds a non-empty executable file.
fn verify_staged(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return None;
    }
    Some(metadata.len())
}
