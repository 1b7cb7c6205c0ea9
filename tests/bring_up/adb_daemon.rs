//! Shared adb daemon health across test workers

use std::sync::{Arc, Barrier};

use rig_core::{CommandResult, Error, PollBudgets};
use rig_device::test_utils::{fake_tools, FakeExecutor};
use rig_device::{DaemonHealthMonitor, ToolAvailability};
use rig_session::run_blocking;

use crate::{NO_DEVICES, PHONE_ONLY};

fn monitor(fake: &Arc<FakeExecutor>) -> DaemonHealthMonitor<FakeExecutor> {
    DaemonHealthMonitor::new(Arc::clone(fake), fake_tools(), PollBudgets::default())
}

#[tokio::test(start_paused = true)]
async fn test_healthy_daemon_is_never_restarted() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("adb version", CommandResult::ok("Android Debug Bridge version 1.0.41"))
        .on("adb devices", CommandResult::ok(PHONE_ONLY));
    let monitor = monitor(&fake);

    for _ in 0..3 {
        let health = monitor.ensure_healthy().await.unwrap();
        assert!(health.is_healthy());
    }

    assert!(!fake.called("kill-server"));
    assert!(!fake.called("start-server"));
}

#[tokio::test]
async fn test_missing_adb_fails_without_restart() {
    let fake = Arc::new(FakeExecutor::new());
    let tools = ToolAvailability {
        adb_path: None,
        ..fake_tools()
    };
    let monitor = DaemonHealthMonitor::new(Arc::clone(&fake), tools, PollBudgets::default());

    let err = monitor.ensure_healthy().await.unwrap_err();
    assert!(matches!(err, Error::ToolNotFound { .. }));
    assert!(fake.calls().is_empty());
}

#[test]
fn test_concurrent_workers_restart_daemon_once() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("adb version", CommandResult::ok("Android Debug Bridge version 1.0.41"))
        .on(
            "adb devices",
            CommandResult::ok("List of devices attached\nemulator-5554\toffline\n"),
        )
        .on("adb kill-server", CommandResult::ok(""))
        .on("adb start-server", CommandResult::ok("* daemon started successfully\n"))
        .after("adb start-server", "adb devices", CommandResult::ok(NO_DEVICES));

    let workers = 4;
    let barrier = Barrier::new(workers);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let monitor = monitor(&fake);
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                run_blocking(monitor.ensure_healthy()).unwrap().unwrap();
            });
        }
    });

    assert_eq!(fake.count("adb kill-server"), 1);
    assert_eq!(fake.count("adb start-server"), 1);
}
