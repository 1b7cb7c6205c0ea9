//! Parallel iOS simulator workers, each with its own server and session slot

use std::sync::{Arc, Barrier};

use rig_core::{CommandResult, DeviceKind, Error};
use rig_device::test_utils::{ios_config, FakeExecutor};
use rig_device::{IosState, PlatformRig};
use rig_session::{run_blocking, ServerState, SessionRegistry};

use crate::{port_free, rig_for, PKG};

const SIMULATORS: &str = "\
== Devices ==
-- iOS 17.2 --
    iPhone 15 (A1B2C3D4-0000-1111-2222-333344445555) (Shutdown)
    iPhone 15 Pro (B2C3D4E5-1111-2222-3333-444455556666) (Booted)
-- iOS 16.4 --
    iPhone 15 (C3D4E5F6-2222-3333-4444-555566667777) (Booted)
";

fn springboard_only() -> CommandResult {
    CommandResult::ok("PID\tStatus\tLabel\n88\t0\tcom.apple.SpringBoard\n")
}

fn with_app() -> CommandResult {
    CommandResult::ok(format!(
        "PID\tStatus\tLabel\n88\t0\tcom.apple.SpringBoard\n4410\t0\tUIKitApplication:{}[5b1e][rb-legacy]\n",
        PKG
    ))
}

/// Simulator tooling for one worker; `udid` is the simulator it will pick
fn script_simulator(fake: &FakeExecutor, udid: &str, port: u16) {
    fake.on(&format!("-iTCP:{}", port), port_free())
        .on("simctl list devices", CommandResult::ok(SIMULATORS))
        .on("launchctl list", springboard_only())
        .on("simctl launch", CommandResult::ok(format!("{}: 4410", PKG)))
        .after(&format!("simctl launch {}", udid), "launchctl list", with_app())
        .on("simctl get_app_container", CommandResult::failed(2, "not installed"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_simulator_is_booted_in_requested_runtime() {
    let udid = "A1B2C3D4-0000-1111-2222-333344445555";
    let fake = Arc::new(FakeExecutor::new());
    script_simulator(&fake, udid, 4723);
    fake.on(&format!("simctl boot {}", udid), CommandResult::ok(""))
        .after(
            &format!("simctl boot {}", udid),
            "simctl list devices",
            CommandResult::ok(SIMULATORS.replacen("(Shutdown)", "(Booted)", 1)),
        );

    let mut rig = rig_for(&fake, ios_config(DeviceKind::Virtual, "iPhone 15", "17.2"));
    let ctx = rig.setup().await.unwrap();

    // The 16.4 "iPhone 15" is already booted but is the wrong runtime
    assert_eq!(ctx.device.identifier.as_deref(), Some(udid));
    assert_eq!(ctx.capabilities["appium:udid"], udid);
    assert!(fake.called(&format!("simctl boot {}", udid)));

    let trace = match rig.platform() {
        PlatformRig::Ios(ios) => ios.trace().to_vec(),
        PlatformRig::Android(_) => panic!("expected the iOS orchestrator"),
    };
    assert!(trace.contains(&IosState::Boot));
    assert_eq!(trace.last(), Some(&IosState::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_simulator_is_fatal() {
    let fake = Arc::new(FakeExecutor::new());
    script_simulator(&fake, "unused", 4723);

    let mut rig = rig_for(&fake, ios_config(DeviceKind::Virtual, "iPhone 99", "17.2"));
    let err = rig.setup().await.unwrap_err();

    assert!(matches!(err, Error::NoDevice { .. }));
    assert!(!fake.called("simctl boot"));
    assert_eq!(rig.server().state(), ServerState::Stopped);
}

#[test]
fn test_parallel_workers_keep_separate_sessions() {
    let registry: SessionRegistry<String> = SessionRegistry::new();
    let workers = [(4723u16, "iPhone 15 Pro"), (4724u16, "iPhone 15 Pro")];
    let barrier = Barrier::new(workers.len());

    std::thread::scope(|scope| {
        for (port, name) in workers {
            let registry = &registry;
            let barrier = &barrier;
            scope.spawn(move || {
                let fake = Arc::new(FakeExecutor::new());
                script_simulator(&fake, "B2C3D4E5-1111-2222-3333-444455556666", port);

                let mut config = ios_config(DeviceKind::Virtual, name, "17.2");
                config.server_port = port;
                let mut rig = rig_for(&fake, config);

                run_blocking(async move {
                    let (ctx, _guard) = rig.setup_in(registry).await.unwrap();
                    assert_eq!(ctx.server_url, format!("http://127.0.0.1:{}", port));

                    // Both sessions are live at once; each thread sees only its own
                    barrier.wait();
                    assert_eq!(registry.get().unwrap(), ctx.handle);
                    assert_eq!(registry.len(), 2);
                    barrier.wait();

                    rig.teardown(ctx).await.unwrap();
                })
                .unwrap();
            });
        }
    });

    assert!(registry.is_empty());
}
