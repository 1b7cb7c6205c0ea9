//! iOS simulator control using xcrun simctl
//!
//! Simulator names routinely contain spaces ("iPhone 15 Pro"), so every simctl
//! command runs in argv mode.
//!
//! `xcrun simctl list devices` groups rows under platform headers:
//!
//! ```text
//! == Devices ==
//! -- iOS 17.2 --
//!     iPhone 15 (0C4B3F0E-5E0F-4A3B-9E53-0A1C2D3E4F50) (Booted)
//!     iPhone 15 Pro (7D9A1C22-8B44-4F6E-A0B1-C2D3E4F5A6B7) (Shutdown)
//! -- iOS 16.4 --
//!     iPhone 14 (11111111-2222-3333-4444-555555555555) (Shutdown)
//! ```

use std::sync::{Arc, LazyLock};

use regex::Regex;

use rig_core::prelude::*;
use rig_core::CommandResult;

use crate::process::{CommandSpec, ProcessExecutor};

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--\s*(.+?)\s*--$").expect("Invalid section header regex"));

static DEVICE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(.+?) \(([0-9A-Fa-f]{8}-[0-9A-Fa-f-]{27})\) \(([A-Za-z ]+)\)")
        .expect("Invalid device row regex")
});

/// Bundle id of the home screen process
pub const SPRINGBOARD: &str = "com.apple.SpringBoard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    ShuttingDown,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            "shutting down" => SimulatorState::ShuttingDown,
            _ => SimulatorState::Unknown,
        }
    }
}

impl SimulatorState {
    /// States from which a simulator can be used or booted
    pub fn is_bootable(&self) -> bool {
        matches!(
            self,
            SimulatorState::Shutdown | SimulatorState::Booted | SimulatorState::Booting
        )
    }
}

/// A simulator row from the device listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorEntry {
    pub name: String,
    pub udid: String,
    pub state: SimulatorState,
    /// Section header the row appeared under (e.g. "iOS 17.2")
    pub runtime: String,
}

/// Whether a section header belongs to the requested platform version
///
/// `version` may be given as "17.2" or "iOS 17.2".
fn runtime_matches(runtime: &str, version: &str) -> bool {
    let version = version.trim();
    runtime == version || runtime.strip_prefix("iOS ") == Some(version)
}

/// Parse the text device listing, tagging each row with its section
pub fn parse_simulator_list(output: &str) -> Vec<SimulatorEntry> {
    let mut runtime: Option<String> = None;
    let mut entries = Vec::new();

    for line in output.lines() {
        if let Some(caps) = SECTION_HEADER.captures(line.trim()) {
            runtime = Some(caps[1].to_string());
            continue;
        }
        let Some(current) = runtime.as_ref() else {
            continue;
        };
        if let Some(caps) = DEVICE_ROW.captures(line) {
            entries.push(SimulatorEntry {
                name: caps[1].to_string(),
                udid: caps[2].to_string(),
                state: SimulatorState::from(&caps[3]),
                runtime: current.clone(),
            });
        }
    }

    entries
}

/// Find a usable simulator by exact name within a platform version section
///
/// Rows under other versions are ignored even when the name matches, and a
/// matching row in a state that cannot be booted is rejected.
pub fn find_simulator(output: &str, name: &str, version: &str) -> Option<SimulatorEntry> {
    let candidate = parse_simulator_list(output)
        .into_iter()
        .find(|entry| entry.name == name && runtime_matches(&entry.runtime, version))?;

    if candidate.state.is_bootable() {
        Some(candidate)
    } else {
        warn!(
            "Simulator {} ({}) is in unusable state {:?}",
            candidate.name, candidate.runtime, candidate.state
        );
        None
    }
}

/// Current state of the named simulator, `None` when no row carries the name
///
/// Rows are matched on the name plus a `(Booted)` or `(Shutdown)` suffix;
/// other states are reported as they appear.
pub fn simulator_state(output: &str, name: &str, version: Option<&str>) -> Option<SimulatorState> {
    parse_simulator_list(output)
        .into_iter()
        .filter(|entry| version.map_or(true, |v| runtime_matches(&entry.runtime, v)))
        .find(|entry| entry.name == name || entry.udid == name)
        .map(|entry| entry.state)
}

/// Runs `xcrun simctl` subcommands
pub struct Simctl<E> {
    executor: Arc<E>,
}

impl<E> Clone for Simctl<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: ProcessExecutor> Simctl<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// `xcrun simctl <args>`
    pub async fn run(&self, args: &[&str]) -> Result<CommandResult> {
        let argv = std::iter::once("simctl").chain(args.iter().copied());
        self.executor.run(&CommandSpec::argv("xcrun", argv)).await
    }

    /// Text output of `xcrun simctl list devices`
    pub async fn list_devices(&self) -> Result<String> {
        let result = self.run(&["list", "devices"]).await?;
        if !result.success() {
            return Err(Error::simulator(format!(
                "simctl list devices failed: {}",
                result.diagnostic()
            )));
        }
        Ok(result.stdout)
    }

    /// Boot a simulator; an already booted simulator is not an error
    pub async fn boot(&self, udid: &str) -> Result<()> {
        let result = self.run(&["boot", udid]).await?;
        if result.success() {
            return Ok(());
        }
        // "Unable to boot device in current state: Booted"
        if result.stderr.contains("current state: Booted") {
            debug!("Simulator {} already booted", udid);
            return Ok(());
        }
        Err(Error::simulator(format!(
            "failed to boot {}: {}",
            udid,
            result.diagnostic()
        )))
    }

    /// `launchctl list` inside the simulator
    pub async fn launchctl_list(&self, udid: &str) -> Result<String> {
        let result = self.run(&["spawn", udid, "launchctl", "list"]).await?;
        if !result.success() {
            return Err(Error::simulator(format!(
                "launchctl list failed on {}: {}",
                udid,
                result.diagnostic()
            )));
        }
        Ok(result.stdout)
    }

    pub async fn launch(&self, udid: &str, bundle_id: &str) -> Result<CommandResult> {
        self.run(&["launch", udid, bundle_id]).await
    }

    pub async fn terminate(&self, udid: &str, bundle_id: &str) -> Result<CommandResult> {
        self.run(&["terminate", udid, bundle_id]).await
    }

    pub async fn get_app_container(&self, udid: &str, bundle_id: &str) -> Result<CommandResult> {
        self.run(&["get_app_container", udid, bundle_id]).await
    }

    pub async fn keychain_reset(&self, udid: &str) -> Result<CommandResult> {
        self.run(&["keychain", udid, "reset"]).await
    }

    /// Turn off the simulated passcode so no unlock prompt appears
    pub async fn disable_passcode(&self, udid: &str) -> Result<CommandResult> {
        self.run(&[
            "spawn",
            udid,
            "defaults",
            "write",
            "com.apple.springboard",
            "SBPasscodeEnabled",
            "-bool",
            "NO",
        ])
        .await
    }

    pub async fn privacy_reset(&self, udid: &str) -> Result<CommandResult> {
        self.run(&["privacy", udid, "reset", "all"]).await
    }

    /// Bring Simulator.app to the front; failures only logged
    pub async fn open_simulator_app(&self) {
        match self
            .executor
            .run(&CommandSpec::argv("open", ["-a", "Simulator"]))
            .await
        {
            Ok(result) if result.success() => {}
            Ok(result) => debug!("open -a Simulator: {}", result.diagnostic()),
            Err(e) => debug!("open -a Simulator failed: {}", e),
        }
    }
}
