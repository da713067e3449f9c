//! Launches the full-node daemon as a child process and exposes a small
//! capability seam (spawn, signal, poll-exit) so lifecycle logic stays
//! platform-agnostic and testable with a fake driver.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod native;

pub use error::{Error, Result};
pub use native::NativeDriver;
pub use nix::sys::signal::Signal;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Describes how a spawned daemon process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,

    /// Terminating signal number, if the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Creates an `ExitInfo` for a normal exit with the given code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Whether the process exited normally with code zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Receives daemon output one line at a time.
///
/// Implementations must not block; they are called from the output pump
/// tasks as lines arrive.
pub trait OutputSink: Send + Sync + 'static {
    /// Called for each line the daemon writes to stdout.
    fn stdout_line(&self, line: &str);

    /// Called for each line the daemon writes to stderr.
    fn stderr_line(&self, line: &str);
}

/// Options for launching the daemon process.
#[derive(Clone)]
pub struct LaunchSpec {
    /// The daemon executable to run.
    pub executable: PathBuf,

    /// The arguments to pass to the executable, in order.
    pub args: Vec<String>,

    /// Environment variables to set for the process.
    pub env: Vec<(String, String)>,

    /// The working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Signal sent to request graceful shutdown.
    pub graceful_signal: Signal,

    /// Bounded time allowed for graceful shutdown before force-kill.
    pub grace_period: Duration,

    /// Sink for daemon output lines. `None` discards both streams.
    pub output_sink: Option<Arc<dyn OutputSink>>,
}

impl fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchSpec")
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("working_dir", &self.working_dir)
            .field("graceful_signal", &self.graceful_signal)
            .field("grace_period", &self.grace_period)
            .field("output_sink", &self.output_sink.as_ref().map(|_| "..."))
            .finish()
    }
}

impl LaunchSpec {
    /// Creates a new `LaunchSpec`.
    ///
    /// The grace period is a required configuration value; termination
    /// escalates from `graceful_signal` (SIGTERM by default) to a forced
    /// kill once it elapses.
    #[must_use]
    pub fn new<P: AsRef<Path>, A: Into<String>>(
        executable: P,
        args: impl IntoIterator<Item = A>,
        grace_period: Duration,
    ) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            working_dir: None,
            graceful_signal: Signal::SIGTERM,
            grace_period,
            output_sink: None,
        }
    }

    /// Sets an environment variable for the process.
    #[must_use]
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn with_working_dir<P: AsRef<Path>>(mut self, working_dir: P) -> Self {
        self.working_dir = Some(working_dir.as_ref().to_path_buf());
        self
    }

    /// Overrides the graceful shutdown signal.
    #[must_use]
    pub const fn with_graceful_signal(mut self, signal: Signal) -> Self {
        self.graceful_signal = signal;
        self
    }

    /// Sets the sink for daemon output lines.
    #[must_use]
    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.output_sink = Some(sink);
        self
    }
}

/// A handle to a spawned daemon process.
///
/// Ownership transfers to the caller on spawn; dropping the handle does not
/// terminate the process.
#[async_trait]
pub trait ProcessHandle: std::fmt::Debug + Send + Sync {
    /// Returns the OS process ID.
    fn pid(&self) -> u32;

    /// Non-blocking probe for the recorded exit status.
    ///
    /// Returns `None` while the process is still running.
    fn poll_exit(&self) -> Option<ExitInfo>;

    /// Whether the process still exists at the OS level.
    fn is_alive(&self) -> bool {
        self.poll_exit().is_none()
    }

    /// Sends the graceful shutdown signal without waiting for exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    fn signal_shutdown(&self) -> Result<()>;

    /// Terminates the process: graceful signal, bounded wait for the grace
    /// period, then force-kill. Returns the observed exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signalled or did not
    /// exit even after the forced kill.
    async fn terminate(&self) -> Result<ExitInfo>;
}

/// Spawns daemon processes.
///
/// This is the platform capability seam: the lifecycle state machine only
/// ever talks to this trait, so it can run against the native driver in
/// production and a fake in tests.
#[async_trait]
pub trait ProcessDriver: Send + Sync + 'static {
    /// Spawns the daemon described by `spec` without waiting for it to
    /// finish initializing.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the process.
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}
