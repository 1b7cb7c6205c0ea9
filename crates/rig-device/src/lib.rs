//! # rig-device - Device, Daemon and App Control
//!
//! Drives the external tools a mobile UI test session depends on: adb and the
//! Android emulator, `xcrun simctl`, and host port utilities.
//!
//! Depends on [`rig_core`] for domain types, errors and bounded polling.
//!
//! ## Public API
//!
//! ### Process Execution
//! - [`ProcessExecutor`] - Run commands and spawn background processes
//! - [`SystemExecutor`] - Executor backed by real OS processes
//! - [`CommandSpec`] - Shell-interpreted or direct-argv command
//!
//! ### Host Ports
//! - [`PortManager`] - Check and free TCP ports (`lsof` / `netstat`)
//!
//! ### Android
//! - [`DaemonHealthMonitor`] - adb daemon health and restart
//! - [`AndroidReadinessOrchestrator`] - Emulator / physical device readiness
//! - [`AndroidConnectivity`], [`AndroidPermissions`] - Device settings
//! - [`list_android_avds()`], [`spawn_avd()`] - AVD discovery and start
//!
//! ### iOS
//! - [`IosReadinessOrchestrator`] - Simulator readiness
//! - [`Simctl`] - `xcrun simctl` wrapper and listing parsers
//!
//! ### Apps
//! - [`AppLifecycle`] - Per-platform app control
//! - [`AppLifecycleController`] - Stop, launch, verify foreground
//!
//! ### Platform Selection
//! - [`PlatformRig`] - Orchestrator and app controller for one platform
//! - [`ToolAvailability`] - Locate adb, emulator, xcrun, appium

pub mod adb;
pub mod android;
pub mod app;
pub mod avds;
pub mod connectivity;
pub mod ios;
pub mod permissions;
pub mod platform;
pub mod ports;
pub mod process;
pub mod simulators;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use adb::{
    parse_device_rows, Adb, AdbDevice, DaemonHealth, DaemonHealthMonitor, DeviceStatus,
    ADB_SERVER_PORT,
};
pub use android::{AndroidReadinessOrchestrator, AndroidState};
pub use app::{
    is_foreground, AndroidApp, AppLifecycle, AppLifecycleController, IosApp, Probe,
};
pub use avds::{list_android_avds, spawn_avd, AndroidAvd};
pub use connectivity::{AndroidConnectivity, Interface};
pub use ios::{IosReadinessOrchestrator, IosState};
pub use permissions::{AndroidPermissions, AppOpMode};
pub use platform::PlatformRig;
pub use ports::{HostOs, PortManager};
pub use process::{CommandSpec, ProcessExecutor, ProcessHandle, SpawnSpec, SystemExecutor};
pub use simulators::{
    find_simulator, parse_simulator_list, simulator_state, Simctl, SimulatorEntry,
    SimulatorState,
};
pub use tool_availability::ToolAvailability;
