//! Automation server port handling during bring-up

use std::sync::Arc;

use rig_core::{CommandResult, DeviceKind, Error};
use rig_device::test_utils::{android_config, FakeExecutor};
use rig_session::ServerState;

use crate::{port_free, rig_for, script_android_basics, PHONE_AND_EMULATOR};

const STALE_SERVER: &str = "\
COMMAND   PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
node    41233   ci   23u  IPv4 0x1f2e3d4c5b6a7988      0t0  TCP 127.0.0.1:4725 (LISTEN)
";

fn running_emulator(fake: &FakeExecutor) {
    script_android_basics(fake);
    fake.on("adb devices", CommandResult::ok(PHONE_AND_EMULATOR))
        .on("emu avd name", CommandResult::ok("Pixel_7_API_34\nOK\n"))
        .on("shell echo ok", CommandResult::ok("ok\n"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_server_is_killed_before_start() {
    let fake = Arc::new(FakeExecutor::new());
    running_emulator(&fake);
    fake.on("kill -9 41233", CommandResult::ok(""))
        .on("-iTCP:4725", CommandResult::ok(STALE_SERVER))
        .after("kill -9 41233", "-iTCP:4725", port_free());

    let mut config = android_config(DeviceKind::Virtual, "Pixel_7_API_34");
    config.server_port = 4725;
    let mut rig = rig_for(&fake, config);

    let ctx = rig.setup().await.unwrap();

    assert!(fake.called("kill -9 41233"));
    assert_eq!(ctx.server_url, "http://127.0.0.1:4725");
    assert_eq!(rig.server().state(), ServerState::Running);
    assert!(fake.spawned()[0].contains("--port 4725"));
}

#[tokio::test(start_paused = true)]
async fn test_port_that_stays_busy_aborts_before_device_work() {
    let fake = Arc::new(FakeExecutor::new());
    running_emulator(&fake);
    fake.on("-iTCP:4725", CommandResult::ok(STALE_SERVER));

    let mut config = android_config(DeviceKind::Virtual, "Pixel_7_API_34");
    config.server_port = 4725;
    let mut rig = rig_for(&fake, config);

    let err = rig.setup().await.unwrap_err();

    assert!(matches!(err, Error::Port { port: 4725, .. }));
    assert!(fake.spawned().is_empty());
    assert!(!fake.called("adb devices"));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_releases_port_even_if_server_was_replaced() {
    let fake = Arc::new(FakeExecutor::new());
    running_emulator(&fake);
    fake.on("-iTCP:4723", port_free())
        .after("am start -W", "-iTCP:4723", CommandResult::ok(STALE_SERVER.replace("4725", "4723")))
        .on("kill -9 41233", CommandResult::ok(""))
        .after("kill -9 41233", "-iTCP:4723", port_free());

    let mut rig = rig_for(&fake, android_config(DeviceKind::Virtual, "Pixel_7_API_34"));
    let ctx = rig.setup().await.unwrap();

    rig.teardown(ctx).await.unwrap();
    assert!(fake.called("kill -9 41233"));
    assert_eq!(rig.server().state(), ServerState::Stopped);
}
