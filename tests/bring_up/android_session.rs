//! Android bring-up through the full Rig sequence

use std::sync::Arc;

use rig_core::{CommandResult, DeviceKind, Error};
use rig_device::test_utils::{android_config, FakeExecutor};
use rig_device::{AndroidState, PlatformRig};
use rig_session::ServerState;

use crate::{focus, port_free, rig_for, script_android_basics, PHONE_AND_EMULATOR, PHONE_ONLY, PKG};

fn android_trace(rig: &crate::TestRig) -> Vec<AndroidState> {
    match rig.platform() {
        PlatformRig::Android(android) => android.trace().to_vec(),
        PlatformRig::Ios(_) => panic!("expected the Android orchestrator"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_absent_emulator_is_spawned_booted_and_session_created() {
    let fake = Arc::new(FakeExecutor::new());
    script_android_basics(&fake);
    fake.on("-iTCP:4723", port_free())
        .on("adb devices", CommandResult::ok(PHONE_ONLY))
        .after("emulator -avd", "adb devices", CommandResult::ok(PHONE_AND_EMULATOR))
        .on("emu avd name", CommandResult::ok("Pixel_7_API_34\nOK\n"))
        .on_seq(
            "getprop sys.boot_completed",
            vec![CommandResult::ok(""), CommandResult::ok(""), CommandResult::ok("1")],
        )
        .on("pm list packages", CommandResult::ok("package:android\npackage:com.android.settings\n"));

    let mut rig = rig_for(&fake, android_config(DeviceKind::Virtual, "Pixel_7_API_34"));
    let ctx = rig.setup().await.unwrap();

    assert_eq!(ctx.device.identifier.as_deref(), Some("emulator-5554"));
    assert_eq!(ctx.capabilities["appium:udid"], "emulator-5554");
    assert_eq!(ctx.capabilities["appium:appPackage"], PKG);
    assert_eq!(ctx.handle, "http://127.0.0.1:4723#Pixel_7_API_34");
    assert_eq!(rig.server().state(), ServerState::Running);

    let spawned = fake.spawned();
    assert_eq!(spawned.len(), 2, "server and emulator: {:?}", spawned);
    assert!(spawned[0].starts_with("appium"));
    assert_eq!(spawned[1], "emulator -avd Pixel_7_API_34 -no-snapshot-load");
    assert_eq!(fake.count("getprop sys.boot_completed"), 3);

    assert_eq!(
        android_trace(&rig),
        vec![
            AndroidState::Unchecked,
            AndroidState::DaemonHealthy,
            AndroidState::DeviceAbsent,
            AndroidState::SpawnRequested,
            AndroidState::Appeared,
            AndroidState::Booted,
            AndroidState::Ready,
        ]
    );

    rig.teardown(ctx).await.unwrap();
    assert_eq!(rig.server().state(), ServerState::Stopped);
    assert_eq!(rig.factory().closed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_app_in_foreground_is_restarted_before_session() {
    let fake = Arc::new(FakeExecutor::new());
    script_android_basics(&fake);
    fake.on("-iTCP:4723", port_free())
        .on("adb devices", CommandResult::ok(PHONE_AND_EMULATOR))
        .on("emu avd name", CommandResult::ok("Pixel_7_API_34\nOK\n"))
        .on("shell echo ok", CommandResult::ok("ok\n"))
        // Already showing the app before the restart
        .on("dumpsys window", focus(PKG))
        .after("am force-stop", "dumpsys window", focus("com.google.android.apps.nexuslauncher"))
        .after("am start -W", "dumpsys window", focus(PKG));

    let mut rig = rig_for(&fake, android_config(DeviceKind::Virtual, "Pixel_7_API_34"));
    rig.setup().await.unwrap();

    let calls = fake.calls();
    let stop = calls.iter().position(|c| c.contains("am force-stop")).unwrap();
    let launch = calls
        .iter()
        .position(|c| c.contains("am start -W -n com.example.shop.stage/.MainActivity"))
        .unwrap();
    assert!(stop < launch);
    // Only the server is spawned; the running emulator is reused
    assert_eq!(fake.spawned().len(), 1);
    assert_eq!(rig.factory().created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wifi_disabled_fails_and_stops_server() {
    let fake = Arc::new(FakeExecutor::new());
    script_android_basics(&fake);
    fake.on("-iTCP:4723", port_free())
        .on("adb devices", CommandResult::ok(PHONE_AND_EMULATOR))
        .on("emu avd name", CommandResult::ok("Pixel_7_API_34\nOK\n"))
        .on("shell echo ok", CommandResult::ok("ok\n"))
        .on("settings get global wifi_on", CommandResult::ok("0"));

    let mut rig = rig_for(&fake, android_config(DeviceKind::Virtual, "Pixel_7_API_34"));
    let err = rig.setup().await.unwrap_err();

    assert!(matches!(err, Error::ConnectivityDisabled { .. }));
    assert!(err.is_fatal());
    assert!(!fake.called("am start"));
    assert_eq!(rig.server().state(), ServerState::Stopped);
    assert!(rig.factory().created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_physical_device_never_spawns_emulator() {
    let fake = Arc::new(FakeExecutor::new());
    script_android_basics(&fake);
    fake.on("-iTCP:4723", port_free())
        .on("adb devices", CommandResult::ok("List of devices attached\nemulator-5554\tdevice\n"));

    let mut rig = rig_for(&fake, android_config(DeviceKind::Real, "R58M123ABC"));
    let err = rig.setup().await.unwrap_err();

    assert!(matches!(err, Error::NoDevice { .. }));
    assert!(fake.spawned().iter().all(|s| !s.contains("emulator -avd")));
    assert_eq!(android_trace(&rig).last(), Some(&AndroidState::DeviceAbsent));
    assert_eq!(rig.server().state(), ServerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_physical_device_version_mismatch_only_warns() {
    let fake = Arc::new(FakeExecutor::new());
    script_android_basics(&fake);
    fake.on("-iTCP:4723", port_free())
        .on("adb devices", CommandResult::ok(PHONE_ONLY))
        .on("shell echo ok", CommandResult::ok("ok\n"))
        .on("getprop ro.build.version.release", CommandResult::ok("13\n"))
        .on("getprop ro.product.model", CommandResult::ok("SM-G991B\n"));

    let mut rig = rig_for(&fake, android_config(DeviceKind::Real, "R58M123ABC"));
    let ctx = rig.setup().await.unwrap();

    assert_eq!(ctx.device.kind, DeviceKind::Real);
    assert_eq!(ctx.device.platform_version, "13");
    assert_eq!(ctx.capabilities["appium:platformVersion"], "13");
}
