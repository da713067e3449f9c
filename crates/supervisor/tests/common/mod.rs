//! Shared fakes for the lifecycle tests: an in-memory process driver and
//! asset source so the state machine can be exercised without spawning
//! anything.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nodehost_process::{Error, ExitInfo, LaunchSpec, ProcessDriver, ProcessHandle, Result};
use nodehost_staging::AssetSource;
use tokio::sync::Notify;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// A process handle whose exit is scripted by the test.
#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    exit: Mutex<Option<ExitInfo>>,
    fail_terminate: Mutex<Option<String>>,
}

impl FakeHandle {
    /// Simulates the daemon dying on its own with the given exit info.
    pub fn record_exit(&self, exit: ExitInfo) {
        *self.exit.lock().unwrap() = Some(exit);
    }

    /// Makes the next `terminate` call fail with the given reason.
    pub fn fail_next_terminate(&self, reason: &str) {
        *self.fail_terminate.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll_exit(&self) -> Option<ExitInfo> {
        *self.exit.lock().unwrap()
    }

    fn signal_shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self) -> Result<ExitInfo> {
        if let Some(reason) = self.fail_terminate.lock().unwrap().take() {
            return Err(Error::Unsupported(reason));
        }
        let mut exit = self.exit.lock().unwrap();
        Ok(*exit.get_or_insert(ExitInfo::from_code(0)))
    }
}

/// A driver that hands out [`FakeHandle`]s and records every launch it saw.
pub struct FakeDriver {
    next_pid: AtomicU32,
    pub launches: Mutex<Vec<LaunchSpec>>,
    pub handles: Mutex<Vec<Arc<FakeHandle>>>,
    fail_spawn: Mutex<Option<String>>,
    /// When set, `spawn` parks until the test releases it. Used to hold a
    /// start in flight while another call races it.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(4000),
            launches: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            fail_spawn: Mutex::new(None),
            gate: Mutex::new(None),
        })
    }

    pub fn fail_next_spawn(&self, reason: &str) {
        *self.fail_spawn.lock().unwrap() = Some(reason.to_string());
    }

    pub fn gate_spawns(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn spawn_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn last_handle(&self) -> Arc<FakeHandle> {
        self.handles.lock().unwrap().last().cloned().unwrap()
    }

    pub fn last_launch(&self) -> LaunchSpec {
        self.launches.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ProcessDriver for FakeDriver {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(reason) = self.fail_spawn.lock().unwrap().take() {
            return Err(Error::Unsupported(reason));
        }

        self.launches.lock().unwrap().push(spec);

        let handle = Arc::new(FakeHandle {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit: Mutex::new(None),
            fail_terminate: Mutex::new(None),
        });
        self.handles.lock().unwrap().push(handle.clone());
        Ok(Box::new(SharedHandle(handle)))
    }
}

/// Wraps an `Arc<FakeHandle>` so the test keeps a handle to script exits
/// after ownership of the boxed handle moved into the supervisor.
#[derive(Debug)]
struct SharedHandle(Arc<FakeHandle>);

#[async_trait]
impl ProcessHandle for SharedHandle {
    fn pid(&self) -> u32 {
        self.0.pid()
    }

    fn poll_exit(&self) -> Option<ExitInfo> {
        self.0.poll_exit()
    }

    fn signal_shutdown(&self) -> Result<()> {
        self.0.signal_shutdown()
    }

    async fn terminate(&self) -> Result<ExitInfo> {
        self.0.terminate().await
    }
}

/// An in-memory asset source serving a scripted set of keys and counting
/// how often each is opened.
pub struct FakeAssetSource {
    payload: Vec<u8>,
    pub missing: bool,
    pub opens: AtomicUsize,
}

impl FakeAssetSource {
    pub fn new() -> Self {
        Self {
            payload: b"#!/bin/sh\nexit 0\n".to_vec(),
            missing: false,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::new()
        }
    }
}

impl AssetSource for FakeAssetSource {
    fn open(&self, key: &str) -> nodehost_staging::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(nodehost_staging::Error::AssetMissing(key.to_string()));
        }
        Ok(Box::new(Cursor::new(self.payload.clone())))
    }
}

pub const TEST_GRACE: Duration = Duration::from_millis(200);
