//! End-to-end bring-up scenarios against scripted device tooling
//!
//! Run with: cargo test --test bring_up

mod bring_up {
    mod adb_daemon;
    mod android_session;
    mod ios_parallel;
    mod server_port;
}

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rig_core::{CommandResult, EnvironmentConfig, PollBudgets, Result};
use rig_device::test_utils::{fake_tools, FakeExecutor};
use rig_device::{HostOs, PlatformRig};
use rig_session::{
    Capabilities, Rig, ServerConfig, ServerLifecycleManager, SessionFactory, StatusProbe,
};

pub const PKG: &str = "com.example.shop.stage";
pub const NO_DEVICES: &str = "List of devices attached\n\n";
pub const PHONE_ONLY: &str = "List of devices attached\nR58M123ABC\tdevice\n";
pub const PHONE_AND_EMULATOR: &str =
    "List of devices attached\nR58M123ABC\tdevice\nemulator-5554\tdevice\n";

// ─────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────

/// Server that answers `/status` immediately
pub struct ReadyProbe;

impl StatusProbe for ReadyProbe {
    async fn is_ready(&self, _status_url: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Session factory that records what it was asked to do
#[derive(Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<Capabilities>>,
    closed: Mutex<Vec<String>>,
}

impl RecordingFactory {
    pub fn created(&self) -> Vec<Capabilities> {
        self.created.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

impl SessionFactory for RecordingFactory {
    type Handle = String;

    async fn create(&self, server_url: &str, capabilities: &Capabilities) -> Result<String> {
        self.created.lock().unwrap().push(capabilities.clone());
        Ok(format!("{}#{}", server_url, capabilities.device_name))
    }

    async fn close(&self, handle: &String) -> Result<()> {
        self.closed.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────

pub fn server_config(port: u16) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        log_level: "info".to_string(),
        base_path: "/".to_string(),
        allow_insecure: Vec::new(),
        relaxed_security: false,
        binary: "appium".to_string(),
        log_dir: PathBuf::from("/tmp/rig-logs"),
        start_attempts: 10,
        interval: Duration::from_secs(1),
    }
}

pub type TestRig = Rig<FakeExecutor, ReadyProbe, RecordingFactory>;

/// Rig wired to `fake`, with the server on `config.server_port`
pub fn rig_for(fake: &Arc<FakeExecutor>, config: EnvironmentConfig) -> TestRig {
    let budgets = PollBudgets::default();
    let server = ServerLifecycleManager::new(
        Arc::clone(fake),
        ReadyProbe,
        server_config(config.server_port),
        &budgets,
    )
    .with_host_os(HostOs::Unix);
    let platform =
        PlatformRig::for_platform(config.platform, Arc::clone(fake), fake_tools(), budgets.clone());
    Rig::new(config, budgets, server, platform, RecordingFactory::default())
}

// ─────────────────────────────────────────────────────────
// Scripted Tool Output
// ─────────────────────────────────────────────────────────

pub fn port_free() -> CommandResult {
    CommandResult::failed(1, "")
}

pub fn focus(package: &str) -> CommandResult {
    CommandResult::ok(format!(
        "  mCurrentFocus=Window{{5d2c1a u0 {0}/{0}.MainActivity}}\n  mFocusedApp=ActivityRecord{{8e1f7b u0 {0}/.MainActivity t42}}\n",
        package
    ))
}

/// Healthy adb, WiFi on, and an app that follows force-stop / start
pub fn script_android_basics(fake: &FakeExecutor) {
    fake.on("adb version", CommandResult::ok("Android Debug Bridge version 1.0.41"))
        .on("settings get global wifi_on", CommandResult::ok("1"))
        .on("dumpsys window", focus("com.google.android.apps.nexuslauncher"))
        .on("am force-stop", CommandResult::ok(""))
        .on(
            "am start -W",
            CommandResult::ok("Starting: Intent { cmp=com.example.shop.stage/.MainActivity }\nStatus: ok\n"),
        )
        .after("am start -W", "dumpsys window", focus(PKG));
}
