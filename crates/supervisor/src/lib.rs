//! Supervises the lifecycle of an external full-node daemon: stages its
//! binary from the packaged assets, launches it against a configuration
//! file and data directory, classifies its run state, and terminates it
//! cleanly.
//!
//! The daemon is opaque to this crate beyond start, stop, and liveness;
//! consensus, networking, and wallet behavior belong to the daemon itself.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod diagnostics;
mod error;

pub use config::{ConfigOptions, RpcCredentials, TunePreset, ensure_config};
pub use diagnostics::{DebugLogInsight, DebugLogStatus, debug_log_insight, tail_debug_log};
pub use error::{Error, Result};

pub use nodehost_process::{
    ExitInfo, LaunchSpec, NativeDriver, OutputSink, ProcessDriver, ProcessHandle, Signal,
};
pub use nodehost_staging::{AssetSource, DirAssetSource, StagedBinary};

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, error, info};

use nodehost_staging as staging;

/// Poll interval used by [`Supervisor::wait`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Regex matching the daemon's own log line timestamps.
static TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z?\s+").expect("invalid regex pattern")
});

/// The lifecycle state of the supervised daemon.
///
/// Exactly one state is current at any time. `Starting` and `Stopping` are
/// first-class observable states, not hidden transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// No daemon process is running.
    NotRunning,
    /// A start request is staging and launching the daemon.
    Starting,
    /// The daemon process is alive.
    Running,
    /// A stop request is terminating the daemon.
    Stopping,
    /// The daemon binary could not be staged from the packaged assets.
    BinaryMissing,
    /// The last operation or the daemon itself failed; the reason is
    /// preserved until the next successful start.
    Error(String),
}

impl LifecycleState {
    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotRunning => "NOT_RUNNING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::BinaryMissing => "BINARY_MISSING",
            Self::Error(_) => "ERROR",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths the daemon is started against. Supplied per start request and not
/// persisted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Absolute path to the daemon configuration file.
    pub config_file: PathBuf,

    /// Absolute path to the daemon data directory.
    pub data_dir: PathBuf,

    /// Absolute path to the install directory binaries are staged under.
    pub install_dir: PathBuf,
}

impl NodeConfig {
    /// Creates a `NodeConfig`, validating that all paths are absolute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathNotAbsolute`] for any relative path.
    pub fn new<P: Into<PathBuf>>(config_file: P, data_dir: P, install_dir: P) -> Result<Self> {
        let config = Self {
            config_file: config_file.into(),
            data_dir: data_dir.into(),
            install_dir: install_dir.into(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for path in [&self.config_file, &self.data_dir, &self.install_dir] {
            if !path.is_absolute() {
                return Err(Error::PathNotAbsolute(path.clone()));
            }
        }
        Ok(())
    }
}

/// Options for constructing a [`Supervisor`].
pub struct SupervisorOptions {
    /// Read-only source of the packaged daemon binary.
    pub asset_source: Arc<dyn AssetSource>,

    /// Bounded time allowed for graceful shutdown before force-kill.
    pub grace_period: Duration,

    /// Pump daemon stdout/stderr through `tracing` under the `daemon`
    /// target. When disabled the streams are discarded.
    pub capture_output: bool,
}

/// Forwards daemon output into `tracing`, stripping the daemon's own
/// timestamp prefix.
struct DaemonLogSink;

impl OutputSink for DaemonLogSink {
    fn stdout_line(&self, line: &str) {
        let message = TIMESTAMP_REGEX.replace(line, "");
        info!(target: "daemon", "{}", message);
    }

    fn stderr_line(&self, line: &str) {
        let message = TIMESTAMP_REGEX.replace(line, "");
        error!(target: "daemon", "{}", message);
    }
}

/// Controls the daemon lifecycle: staging, launch, status, termination.
///
/// `start` and `stop` perform filesystem and process-creation work; call
/// them from a runtime worker rather than a latency-critical task.
/// [`Supervisor::status`] is cheap and safe to call from a polling timer.
///
/// Concurrent `start`/`stop` calls are serialized; a call arriving while
/// another is in flight fails fast with [`Error::AlreadyInProgress`]
/// instead of queuing.
///
/// The staged binary and the data directory must not be shared between
/// supervisors: this crate assumes a single supervisor instance per data
/// directory and does not enforce it with a lock.
pub struct Supervisor {
    driver: Arc<dyn ProcessDriver>,
    asset_source: Arc<dyn AssetSource>,
    grace_period: Duration,
    capture_output: bool,

    state: RwLock<LifecycleState>,
    handle: Mutex<Option<Box<dyn ProcessHandle>>>,
    last_exit: Mutex<Option<ExitInfo>>,
    last_install_dir: Mutex<Option<PathBuf>>,

    /// Serializes start/stop; never held across `status`.
    op_guard: tokio::sync::Mutex<()>,
}

impl Supervisor {
    /// Creates a supervisor using the given process driver.
    #[must_use]
    pub fn new(driver: Arc<dyn ProcessDriver>, options: SupervisorOptions) -> Self {
        Self {
            driver,
            asset_source: options.asset_source,
            grace_period: options.grace_period,
            capture_output: options.capture_output,
            state: RwLock::new(LifecycleState::NotRunning),
            handle: Mutex::new(None),
            last_exit: Mutex::new(None),
            last_install_dir: Mutex::new(None),
            op_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a supervisor backed by the native OS process driver.
    ///
    /// # Errors
    ///
    /// Returns an error if native process control cannot be initialized on
    /// this host; the check runs once here rather than on every call.
    pub fn native(options: SupervisorOptions) -> Result<Self> {
        let driver = NativeDriver::new()?;
        Ok(Self::new(Arc::new(driver), options))
    }

    /// Stages the daemon binary if needed and launches it.
    ///
    /// Accepted only from `NotRunning`, `BinaryMissing`, or `Error`. The
    /// call returns once the process is spawned; it does not wait for the
    /// daemon to finish initializing.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInProgress`] if another start/stop is in flight.
    /// - [`Error::AlreadyRunning`] if the daemon is running.
    /// - [`Error::Staging`] if the binary cannot be staged; state becomes
    ///   `BinaryMissing` and no process is spawned.
    /// - [`Error::Launch`] if the OS refuses to spawn; state becomes
    ///   `Error`.
    ///
    /// Failed starts are never retried internally; the caller decides.
    pub async fn start(&self, config: &NodeConfig) -> Result<()> {
        config.validate()?;

        let Ok(_guard) = self.op_guard.try_lock() else {
            return Err(Error::AlreadyInProgress);
        };

        // Fold a pending unexpected exit into state first, so a start after
        // a silent daemon death is accepted rather than AlreadyRunning.
        self.reconcile();

        {
            let state = self.state.read();
            if !matches!(
                *state,
                LifecycleState::NotRunning | LifecycleState::BinaryMissing | LifecycleState::Error(_)
            ) {
                return Err(Error::AlreadyRunning);
            }
        }

        // A handle can survive into the error state when a stop failed to
        // terminate the process; spawning again would leak it.
        if self.handle.lock().is_some() {
            return Err(Error::AlreadyRunning);
        }

        info!("starting daemon");
        *self.state.write() = LifecycleState::Starting;
        self.last_exit.lock().take();
        *self.last_install_dir.lock() = Some(config.install_dir.clone());

        let staged = match staging::ensure_staged(self.asset_source.as_ref(), &config.install_dir)
        {
            Ok(staged) => staged,
            Err(e) => {
                error!("staging failed: {}", e);
                *self.state.write() = LifecycleState::BinaryMissing;
                return Err(e.into());
            }
        };

        if let Err(e) = fs::create_dir_all(&config.data_dir) {
            let err = Error::Io("failed to create data directory", e);
            *self.state.write() = LifecycleState::Error(err.to_string());
            return Err(err);
        }

        // Argument order is stable: config flag, then data directory flag.
        let mut spec = LaunchSpec::new(
            &staged.path,
            [
                format!("--conf={}", config.config_file.display()),
                format!("--datadir={}", config.data_dir.display()),
            ],
            self.grace_period,
        );
        if self.capture_output {
            spec = spec.with_output_sink(Arc::new(DaemonLogSink));
        }

        match self.driver.spawn(spec).await {
            Ok(handle) => {
                info!("daemon started with pid {}", handle.pid());
                *self.handle.lock() = Some(handle);
                *self.state.write() = LifecycleState::Running;
                Ok(())
            }
            Err(e) => {
                error!("daemon launch failed: {}", e);
                *self.state.write() = LifecycleState::Error(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Stops the daemon: graceful signal, bounded wait for the configured
    /// grace period, then forced kill.
    ///
    /// A no-op returning the current state when nothing is running, so it
    /// is always safe to call even if `start` never succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInProgress`] if another start/stop is in flight.
    /// - [`Error::Launch`] if the process could not be terminated.
    pub async fn stop(&self) -> Result<LifecycleState> {
        let Ok(_guard) = self.op_guard.try_lock() else {
            return Err(Error::AlreadyInProgress);
        };

        let current = self.state.read().clone();
        if matches!(
            current,
            LifecycleState::NotRunning | LifecycleState::BinaryMissing
        ) {
            debug!("no running daemon to stop");
            return Ok(current);
        }

        info!("stopping daemon");
        *self.state.write() = LifecycleState::Stopping;

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.terminate().await {
                Ok(exit) => info!("daemon exited ({})", exit),
                Err(e) => {
                    error!("failed to stop daemon: {}", e);
                    // The process may still exist; keep the handle so a
                    // later stop can retry termination.
                    *self.handle.lock() = Some(handle);
                    *self.state.write() = LifecycleState::Error(e.to_string());
                    return Err(e.into());
                }
            }
        }

        self.last_exit.lock().take();
        *self.state.write() = LifecycleState::NotRunning;
        info!("daemon stopped");
        Ok(LifecycleState::NotRunning)
    }

    /// Returns the current lifecycle state.
    ///
    /// Never blocks materially and never mutates state, with one
    /// exception: discovering that the daemon exited while `Running`
    /// transitions to `Error` and clears the process handle.
    pub fn status(&self) -> LifecycleState {
        self.reconcile();

        let state = self.state.read().clone();
        if state == LifecycleState::NotRunning {
            // The staged binary can disappear out from under us (cleared
            // application storage); report that distinctly so the host can
            // point the user at packaging rather than a generic retry.
            let binary_gone = self
                .last_install_dir
                .lock()
                .as_ref()
                .is_some_and(|dir| !staging::staged_binary_present(dir));
            if binary_gone {
                return LifecycleState::BinaryMissing;
            }
        }
        state
    }

    /// Returns the pid of the running daemon.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if no process handle is held.
    pub fn pid(&self) -> Result<u32> {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| handle.pid())
            .ok_or(Error::NotRunning)
    }

    /// Waits until the daemon is no longer running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedExit`] if the daemon died without a stop
    /// request, or [`Error::NotRunning`] if the supervisor is in an error
    /// state with no recorded exit.
    pub async fn wait(&self) -> Result<()> {
        loop {
            match self.status() {
                LifecycleState::NotRunning | LifecycleState::BinaryMissing => return Ok(()),
                LifecycleState::Error(_) => {
                    let exit = *self.last_exit.lock();
                    return Err(exit.map_or(Error::NotRunning, Error::UnexpectedExit));
                }
                _ => tokio::time::sleep(WAIT_POLL_INTERVAL).await,
            }
        }
    }

    /// Folds a recorded daemon exit into state and clears the handle.
    ///
    /// Any exit without a stop request is abnormal, including a clean code
    /// zero; a daemon that decides to quit on its own is never reported as
    /// plain `NotRunning`.
    fn reconcile(&self) {
        let mut handle = self.handle.lock();
        if let Some(held) = handle.as_ref() {
            if let Some(exit) = held.poll_exit() {
                let reason = Error::UnexpectedExit(exit).to_string();
                error!("{}", reason);
                *handle = None;
                *self.last_exit.lock() = Some(exit);
                *self.state.write() = LifecycleState::Error(reason);
            }
        }
    }
}
