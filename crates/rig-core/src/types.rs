//! Domain types shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────
// Platform / Device
// ─────────────────────────────────────────────────────────────────

/// Mobile platform under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Android,
    #[serde(rename = "ios")]
    IOS,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::IOS => "ios",
        }
    }

    /// Name used in driver capabilities (`platformName`)
    pub fn capability_name(&self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::IOS => "iOS",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capability_name())
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::IOS),
            other => Err(crate::Error::config_invalid(format!(
                "unknown platform '{}', expected 'android' or 'ios'",
                other
            ))),
        }
    }
}

/// Whether the target is a virtual device or physical hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Virtual,
    Real,
}

impl DeviceKind {
    pub fn is_virtual(&self) -> bool {
        matches!(self, DeviceKind::Virtual)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Virtual => write!(f, "virtual"),
            DeviceKind::Real => write!(f, "real"),
        }
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "virtual" | "emulator" | "simulator" => Ok(DeviceKind::Virtual),
            "real" | "physical" => Ok(DeviceKind::Real),
            other => Err(crate::Error::config_invalid(format!(
                "unknown device kind '{}', expected 'virtual' or 'real'",
                other
            ))),
        }
    }
}

/// Deployment environment the app build targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTag {
    #[default]
    Stage,
    Prod,
}

impl fmt::Display for EnvironmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentTag::Stage => write!(f, "stage"),
            EnvironmentTag::Prod => write!(f, "prod"),
        }
    }
}

impl std::str::FromStr for EnvironmentTag {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stage" | "staging" => Ok(EnvironmentTag::Stage),
            "prod" | "production" => Ok(EnvironmentTag::Prod),
            other => Err(crate::Error::config_invalid(format!(
                "unknown environment '{}', expected 'stage' or 'prod'",
                other
            ))),
        }
    }
}

/// A device selected for a test session
///
/// Created when an orchestrator first detects a candidate device and filled in
/// as detection and boot proceed. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub platform: Platform,
    pub kind: DeviceKind,
    /// adb serial or simulator UDID, known once the device is detected
    pub identifier: Option<String>,
    pub platform_version: String,
    pub display_name: String,
}

impl DeviceSession {
    pub fn new(
        platform: Platform,
        kind: DeviceKind,
        platform_version: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            kind,
            identifier: None,
            platform_version: platform_version.into(),
            display_name: display_name.into(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Identifier if detected, otherwise the display name
    pub fn label(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.display_name)
    }
}

// ─────────────────────────────────────────────────────────────────
// Environment Configuration
// ─────────────────────────────────────────────────────────────────

/// App reset behaviour requested for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ResetFlags {
    /// Reinstall / wipe app data before the session
    #[serde(default)]
    pub full_reset: bool,
    /// Keep app state between sessions
    #[serde(default)]
    pub no_reset: bool,
}

/// Fully resolved, read-only environment description
///
/// Produced by the configuration layer and shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub platform: Platform,
    pub device_kind: DeviceKind,
    pub platform_version: String,
    /// AVD name, simulator name, or real device serial
    pub device_name: String,
    pub environment: EnvironmentTag,
    /// Android package or iOS bundle identifier resolved for `environment`
    pub app_id: String,
    /// Launch activity for Android apps, if known
    pub app_activity: Option<String>,
    pub reset: ResetFlags,
    pub server_host: String,
    pub server_port: u16,
}

impl EnvironmentConfig {
    /// Base URL of the automation server
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}

// ─────────────────────────────────────────────────────────────────
// Process / Port
// ─────────────────────────────────────────────────────────────────

/// Captured output of a finished external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Exit code 0 with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(stdout, "", 0)
    }

    /// Non-zero exit with the given stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::new("", stderr, exit_code)
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code 0 and nothing written to stderr
    pub fn clean(&self) -> bool {
        self.success() && self.stderr.trim().is_empty()
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// First non-empty of stderr / stdout, for error messages
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Listener state of a TCP port on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortState {
    pub port: u16,
    pub occupied: bool,
    /// Owning process ids when occupied
    pub pids: Vec<u32>,
}

impl PortState {
    pub fn free(port: u16) -> Self {
        Self {
            port,
            occupied: false,
            pids: Vec::new(),
        }
    }

    pub fn occupied(port: u16, pids: Vec<u32>) -> Self {
        Self {
            port,
            occupied: true,
            pids,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Poll Budgets
// ─────────────────────────────────────────────────────────────────

/// Conventional interval between poll attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Attempt caps for every bounded wait in the bring-up sequence
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollBudgets {
    /// Interval between attempts in milliseconds
    pub interval_ms: u64,
    pub daemon_stop: u32,
    pub daemon_start: u32,
    pub daemon_health: u32,
    pub device_appear: u32,
    pub device_boot: u32,
    pub simulator_boot: u32,
    pub springboard: u32,
    pub app_stop: u32,
    pub app_launch: u32,
    pub port_free: u32,
    pub server_start: u32,
    /// Device setting or permission change becoming observable
    pub setting_change: u32,
}

impl Default for PollBudgets {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            daemon_stop: 10,
            daemon_start: 30,
            daemon_health: 30,
            device_appear: 120,
            device_boot: 240,
            simulator_boot: 120,
            springboard: 60,
            app_stop: 10,
            app_launch: 30,
            port_free: 5,
            server_start: 60,
            setting_change: 5,
        }
    }
}

impl PollBudgets {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
