//! Native process driver backed by `tokio::process` and Unix signals.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::{ExitInfo, LaunchSpec, OutputSink, ProcessDriver, ProcessHandle};

// Margin past the grace period for the forced kill itself to take effect.
const KILL_MARGIN: Duration = Duration::from_secs(5);

/// Spawns daemon processes directly on the host OS.
#[derive(Debug, Clone, Copy)]
pub struct NativeDriver {
    _private: (),
}

impl NativeDriver {
    /// Creates the native driver, verifying once that signal delivery works
    /// on this host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the process-control environment is
    /// unusable, so the failure surfaces at construction rather than on the
    /// first stop request.
    pub fn new() -> Result<Self> {
        signal::kill(Pid::this(), None)
            .map_err(|e| Error::Unsupported(format!("signal delivery probe failed: {e}")))?;

        Ok(Self { _private: () })
    }
}

#[async_trait]
impl ProcessDriver for NativeDriver {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::null());

        if let Some(ref working_dir) = spec.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if spec.output_sink.is_some() {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        debug!("spawning daemon: {:?}", cmd);

        let mut child = cmd.spawn().map_err(Error::ExecFailed)?;
        let pid = child.id().ok_or(Error::MissingPid)?;

        debug!("daemon spawned with pid {}", pid);

        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let (exit_tx, exit_rx) = watch::channel(None::<ExitInfo>);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            if let Some(ref sink) = spec.output_sink {
                let sink = Arc::clone(sink);
                task_tracker.spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        sink.stdout_line(&line);
                    }
                });
            }
        }

        if let Some(stderr) = stderr {
            if let Some(ref sink) = spec.output_sink {
                let sink = Arc::clone(sink);
                task_tracker.spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        sink.stderr_line(&line);
                    }
                });
            }
        }

        // Monitor the child: record its exit status, or escalate shutdown
        // when termination is requested.
        let graceful_signal = spec.graceful_signal;
        let grace_period = spec.grace_period;
        let shutdown_token_clone = shutdown_token.clone();
        tokio::task::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            if status.success() {
                                info!("daemon exited with status: {}", status);
                            } else {
                                error!("daemon exited with non-zero status: {}", status);
                            }
                            let _ = exit_tx.send(Some(exit_info(status)));
                        }
                        Err(err) => {
                            error!("failed to wait for daemon: {}", err);
                            let _ = exit_tx.send(Some(ExitInfo { code: None, signal: None }));
                        }
                    }
                }
                () = shutdown_token_clone.cancelled() => {
                    info!("shutdown requested, signalling daemon (pid {})", pid);

                    let nix_pid = Pid::from_raw(pid as i32);
                    if let Err(err) = signal::kill(nix_pid, graceful_signal) {
                        error!("failed to send {} to daemon: {}", graceful_signal, err);
                    }

                    match tokio::time::timeout(grace_period, child.wait()).await {
                        Ok(Ok(status)) => {
                            info!("daemon exited with status: {}", status);
                            let _ = exit_tx.send(Some(exit_info(status)));
                        }
                        Ok(Err(err)) => {
                            error!("failed to wait for daemon: {}", err);
                            let _ = exit_tx.send(Some(ExitInfo { code: None, signal: None }));
                        }
                        Err(_) => {
                            warn!("grace period elapsed, killing daemon (pid {})", pid);
                            if let Err(err) = child.kill().await {
                                error!("failed to kill daemon: {}", err);
                            }
                            match child.wait().await {
                                Ok(status) => {
                                    let _ = exit_tx.send(Some(exit_info(status)));
                                }
                                Err(err) => {
                                    error!("failed to reap killed daemon: {}", err);
                                    let _ = exit_tx.send(Some(ExitInfo { code: None, signal: None }));
                                }
                            }
                        }
                    }
                }
            }
        });

        task_tracker.close();

        Ok(Box::new(NativeHandle {
            pid,
            graceful_signal,
            grace_period,
            shutdown_token,
            task_tracker,
            exit_rx,
        }))
    }
}

/// A running daemon process owned by the native driver.
#[derive(Debug)]
struct NativeHandle {
    pid: u32,
    graceful_signal: Signal,
    grace_period: Duration,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

#[async_trait]
impl ProcessHandle for NativeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll_exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    fn is_alive(&self) -> bool {
        if self.poll_exit().is_some() {
            return false;
        }

        // kill(pid, 0) checks for existence without sending a signal.
        unsafe { libc::kill(self.pid as i32, 0) == 0 }
    }

    fn signal_shutdown(&self) -> Result<()> {
        let pid = Pid::from_raw(self.pid as i32);
        signal::kill(pid, self.graceful_signal).map_err(|e| Error::Signal(self.pid, e))
    }

    async fn terminate(&self) -> Result<ExitInfo> {
        if let Some(exit) = self.poll_exit() {
            return Ok(exit);
        }

        self.shutdown_token.cancel();

        let deadline = self.grace_period + KILL_MARGIN;
        let mut exit_rx = self.exit_rx.clone();
        let exit = {
            let recorded = tokio::time::timeout(deadline, exit_rx.wait_for(Option::is_some))
                .await
                .map_err(|_| Error::ShutdownTimeout(self.pid))?
                .map_err(|e| {
                    Error::Io(
                        "daemon monitor task dropped",
                        std::io::Error::new(std::io::ErrorKind::BrokenPipe, e),
                    )
                })?;
            (*recorded).unwrap_or(ExitInfo {
                code: None,
                signal: None,
            })
        };

        // Let the output pumps drain before reporting the exit.
        self.task_tracker.wait().await;

        Ok(exit)
    }
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}
