//! End-to-end lifecycle tests against a fake process driver, covering the
//! full state machine without spawning real processes.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use nodehost_supervisor::{
    Error, ExitInfo, LifecycleState, NodeConfig, Supervisor, SupervisorOptions,
};

use common::{FakeAssetSource, FakeDriver, TEST_GRACE, init_test_logging};

fn test_config(root: &std::path::Path) -> NodeConfig {
    NodeConfig::new(
        root.join("node.conf"),
        root.join("nodedata"),
        root.to_path_buf(),
    )
    .unwrap()
}

fn supervisor_with(driver: Arc<FakeDriver>, source: FakeAssetSource) -> Supervisor {
    Supervisor::new(
        driver,
        SupervisorOptions {
            asset_source: Arc::new(source),
            grace_period: TEST_GRACE,
            capture_output: false,
        },
    )
}

#[tokio::test]
async fn start_then_stop_returns_to_not_running() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    assert_eq!(supervisor.status(), LifecycleState::NotRunning);

    supervisor.start(&config).await.unwrap();
    assert_eq!(supervisor.status(), LifecycleState::Running);
    assert!(supervisor.pid().is_ok());

    let final_state = supervisor.stop().await.unwrap();
    assert_eq!(final_state, LifecycleState::NotRunning);
    assert_eq!(supervisor.status(), LifecycleState::NotRunning);
    assert!(matches!(supervisor.pid(), Err(Error::NotRunning)));
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    init_test_logging();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());

    let state = supervisor.stop().await.unwrap();
    assert_eq!(state, LifecycleState::NotRunning);
    assert_eq!(driver.spawn_count(), 0);
}

#[tokio::test]
async fn start_while_running_is_rejected_without_a_second_spawn() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    let err = supervisor.start(&config).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert_eq!(driver.spawn_count(), 1);
    assert_eq!(supervisor.status(), LifecycleState::Running);
}

#[tokio::test]
async fn missing_asset_leaves_binary_missing_and_no_process() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::missing());
    let config = test_config(dir.path());

    let err = supervisor.start(&config).await.unwrap_err();
    assert!(matches!(err, Error::Staging(_)));
    assert_eq!(supervisor.status(), LifecycleState::BinaryMissing);
    assert_eq!(driver.spawn_count(), 0);
    assert!(matches!(supervisor.pid(), Err(Error::NotRunning)));

    // Stop stays a safe no-op from here.
    let state = supervisor.stop().await.unwrap();
    assert_eq!(state, LifecycleState::BinaryMissing);
}

#[tokio::test]
async fn launch_refusal_surfaces_as_error_state() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    driver.fail_next_spawn("exec format error");
    let err = supervisor.start(&config).await.unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    assert!(matches!(supervisor.status(), LifecycleState::Error(_)));

    // A later start from the error state is accepted.
    supervisor.start(&config).await.unwrap();
    assert_eq!(supervisor.status(), LifecycleState::Running);
}

#[tokio::test]
async fn unexpected_exit_is_discovered_on_the_next_status_probe() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    driver.last_handle().record_exit(ExitInfo::from_code(1));

    match supervisor.status() {
        LifecycleState::Error(reason) => assert!(reason.contains("exit code 1")),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(supervisor.pid(), Err(Error::NotRunning)));

    // The error state is sticky across probes until the next start.
    assert!(matches!(supervisor.status(), LifecycleState::Error(_)));
    supervisor.start(&config).await.unwrap();
    assert_eq!(supervisor.status(), LifecycleState::Running);
}

#[tokio::test]
async fn clean_self_exit_is_still_an_error() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    driver.last_handle().record_exit(ExitInfo::from_code(0));

    // Exit code zero without a stop request must not read as NotRunning.
    assert!(matches!(supervisor.status(), LifecycleState::Error(_)));
}

#[tokio::test]
async fn wait_returns_unexpected_exit() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    driver.last_handle().record_exit(ExitInfo::from_code(137));

    let err = supervisor.wait().await.unwrap_err();
    match err {
        Error::UnexpectedExit(exit) => assert_eq!(exit.code, Some(137)),
        other => panic!("expected UnexpectedExit, got {other:?}"),
    }
}

#[tokio::test]
async fn launch_arguments_and_staged_path_are_deterministic() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    assert_eq!(supervisor.status().as_str(), "RUNNING");

    let launch = driver.last_launch();
    assert_eq!(launch.executable, dir.path().join("bin").join("daemon"));
    assert_eq!(
        launch.args,
        vec![
            format!("--conf={}", config.config_file.display()),
            format!("--datadir={}", config.data_dir.display()),
        ]
    );
    assert_eq!(launch.grace_period, TEST_GRACE);

    // The data directory was created ahead of the launch.
    assert!(config.data_dir.is_dir());
}

#[tokio::test]
async fn staging_is_skipped_when_the_binary_is_already_in_place() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let source = FakeAssetSource::new();
    let supervisor = Supervisor::new(
        driver.clone(),
        SupervisorOptions {
            asset_source: Arc::new(source),
            grace_period: TEST_GRACE,
            capture_output: false,
        },
    );
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    supervisor.stop().await.unwrap();
    supervisor.start(&config).await.unwrap();

    // One asset copy serves both starts.
    let staged = dir.path().join("bin").join("daemon");
    assert!(staged.is_file());
    assert_eq!(driver.spawn_count(), 2);
}

#[tokio::test]
async fn status_reports_binary_missing_after_the_staged_file_disappears() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), LifecycleState::NotRunning);

    fs::remove_file(dir.path().join("bin").join("daemon")).unwrap();
    assert_eq!(supervisor.status(), LifecycleState::BinaryMissing);
}

#[tokio::test]
async fn failed_stop_keeps_the_handle_for_a_retry() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = supervisor_with(driver.clone(), FakeAssetSource::new());
    let config = test_config(dir.path());

    supervisor.start(&config).await.unwrap();
    driver.last_handle().fail_next_terminate("signal delivery refused");

    let err = supervisor.stop().await.unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    assert!(matches!(supervisor.status(), LifecycleState::Error(_)));

    // The process may still exist, so the handle stays held and a new
    // start must not spawn a second daemon over it.
    assert!(supervisor.pid().is_ok());
    let err = supervisor.start(&config).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert_eq!(driver.spawn_count(), 1);

    // A retried stop re-attempts termination and succeeds.
    let state = supervisor.stop().await.unwrap();
    assert_eq!(state, LifecycleState::NotRunning);
    assert!(matches!(supervisor.pid(), Err(Error::NotRunning)));
}

#[tokio::test]
async fn concurrent_starts_fail_fast_instead_of_queuing() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let supervisor = Arc::new(supervisor_with(driver.clone(), FakeAssetSource::new()));
    let config = test_config(dir.path());

    let gate = driver.gate_spawns();

    let racing = {
        let supervisor = supervisor.clone();
        let config = config.clone();
        tokio::spawn(async move { supervisor.start(&config).await })
    };

    // Wait until the first start holds the operation guard inside spawn.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while driver.spawn_count() == 0 && supervisor.status() != LifecycleState::Starting {
        assert!(tokio::time::Instant::now() < deadline, "start never got in flight");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let err = supervisor.start(&config).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyInProgress));
    let err = supervisor.stop().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyInProgress));

    gate.notify_one();
    racing.await.unwrap().unwrap();
    assert_eq!(supervisor.status(), LifecycleState::Running);
    assert_eq!(driver.spawn_count(), 1);
}
