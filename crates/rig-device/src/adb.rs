//! adb command helper and daemon health monitoring
//!
//! The adb server is shared by every test thread in the process. Checking it
//! is cheap and read-only; restarting it disconnects every attached device,
//! so a restart only happens when the daemon is observably unhealthy, and
//! concurrent callers are serialized on a process-wide lock.

use std::fmt;
use std::sync::{Arc, LazyLock};

use tokio::sync::Mutex;

use rig_core::prelude::*;
use rig_core::{CommandResult, PollBudgets, PollSpec};

use crate::ports::PortManager;
use crate::process::{quote_arg, CommandSpec, ProcessExecutor};
use crate::tool_availability::ToolAvailability;

/// Port the adb server listens on
pub const ADB_SERVER_PORT: u16 = 5037;

/// Held while the adb server is being restarted
static DAEMON_RESTART: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Connection status of a device row in `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// `device` - connected and usable
    Healthy,
    Offline,
    Unauthorized,
    /// Any other token (`bootloader`, `recovery`, `no permissions`, ...)
    Unknown(String),
}

impl From<&str> for DeviceStatus {
    fn from(token: &str) -> Self {
        match token {
            "device" => DeviceStatus::Healthy,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            other => DeviceStatus::Unknown(other.to_string()),
        }
    }
}

impl DeviceStatus {
    /// Offline and unauthorized devices make the daemon unhealthy
    pub fn is_degraded(&self) -> bool {
        matches!(self, DeviceStatus::Offline | DeviceStatus::Unauthorized)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Healthy => write!(f, "device"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Unauthorized => write!(f, "unauthorized"),
            DeviceStatus::Unknown(token) => write!(f, "{}", token),
        }
    }
}

/// A row of `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
    pub serial: String,
    pub status: DeviceStatus,
}

impl AdbDevice {
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }

    pub fn is_healthy(&self) -> bool {
        self.status == DeviceStatus::Healthy
    }
}

/// Classified device list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonHealth {
    pub devices: Vec<AdbDevice>,
}

impl DaemonHealth {
    /// At least one healthy device and none offline or unauthorized
    pub fn is_healthy(&self) -> bool {
        self.devices.iter().any(AdbDevice::is_healthy) && !self.has_degraded()
    }

    pub fn has_degraded(&self) -> bool {
        self.devices.iter().any(|d| d.status.is_degraded())
    }

    pub fn healthy_devices(&self) -> impl Iterator<Item = &AdbDevice> {
        self.devices.iter().filter(|d| d.is_healthy())
    }

    pub fn find(&self, serial: &str) -> Option<&AdbDevice> {
        self.devices.iter().find(|d| d.serial == serial)
    }
}

/// Parse `adb devices` output into device rows
///
/// Each row is `<serial><whitespace><status>`. The header line and `*` daemon
/// notices are skipped.
pub fn parse_device_rows(output: &str) -> Vec<AdbDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let serial = columns.next()?;
            let status = columns.next()?;
            Some(AdbDevice {
                serial: serial.to_string(),
                status: DeviceStatus::from(status),
            })
        })
        .collect()
}

/// Runs adb commands through a [`ProcessExecutor`]
pub struct Adb<E> {
    executor: Arc<E>,
    program: String,
}

impl<E> Clone for Adb<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            program: self.program.clone(),
        }
    }
}

impl<E: ProcessExecutor> Adb<E> {
    pub fn new(executor: Arc<E>, tools: &ToolAvailability) -> Self {
        Self {
            executor,
            program: quote_arg(tools.adb()),
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// `adb <args>`
    pub async fn run(&self, args: &str) -> Result<CommandResult> {
        self.executor
            .run(&CommandSpec::shell(format!("{} {}", self.program, args)))
            .await
    }

    /// `adb -s <serial> <args>`
    pub async fn on_device(&self, serial: &str, args: &str) -> Result<CommandResult> {
        self.run(&format!("-s {} {}", serial, args)).await
    }

    /// `adb -s <serial> shell <command>`
    pub async fn shell(&self, serial: &str, command: &str) -> Result<CommandResult> {
        self.on_device(serial, &format!("shell {}", command)).await
    }

    /// Current device rows, failing if `adb devices` itself fails
    pub async fn devices(&self) -> Result<Vec<AdbDevice>> {
        let result = self.run("devices").await?;
        if !result.success() {
            return Err(Error::daemon(format!(
                "adb devices failed: {}",
                result.diagnostic()
            )));
        }
        Ok(parse_device_rows(&result.stdout))
    }
}

/// Watches the adb server and restarts it when it misbehaves
pub struct DaemonHealthMonitor<E> {
    adb: Adb<E>,
    tools: ToolAvailability,
    ports: PortManager<E>,
    budgets: PollBudgets,
}

impl<E> Clone for DaemonHealthMonitor<E> {
    fn clone(&self) -> Self {
        Self {
            adb: self.adb.clone(),
            tools: self.tools.clone(),
            ports: self.ports.clone(),
            budgets: self.budgets.clone(),
        }
    }
}

impl<E: ProcessExecutor> DaemonHealthMonitor<E> {
    pub fn new(executor: Arc<E>, tools: ToolAvailability, budgets: PollBudgets) -> Self {
        Self {
            adb: Adb::new(Arc::clone(&executor), &tools),
            ports: PortManager::new(executor, &budgets),
            tools,
            budgets,
        }
    }

    pub fn adb(&self) -> &Adb<E> {
        &self.adb
    }

    /// The daemon answers `adb devices` with exit 0 and nothing on stderr
    pub async fn is_daemon_running(&self) -> Result<bool> {
        Ok(self.adb.run("devices").await?.clean())
    }

    /// Classify every attached device by its status token
    pub async fn classify_devices(&self) -> Result<DaemonHealth> {
        Ok(DaemonHealth {
            devices: self.adb.devices().await?,
        })
    }

    /// Make sure the daemon is running with no offline or unauthorized devices
    ///
    /// Never restarts a daemon that is already in that state. A missing adb
    /// binary fails immediately.
    pub async fn ensure_healthy(&self) -> Result<DaemonHealth> {
        self.verify_adb().await?;

        if let Some(health) = self.healthy_snapshot().await {
            debug!("adb daemon healthy ({} devices)", health.devices.len());
            return Ok(health);
        }

        let _restart = DAEMON_RESTART.lock().await;

        // Another thread may have restarted the daemon while we waited
        if let Some(health) = self.healthy_snapshot().await {
            info!("adb daemon recovered while waiting for restart lock");
            return Ok(health);
        }

        self.restart().await
    }

    async fn verify_adb(&self) -> Result<()> {
        let adb = self.tools.require_adb()?;
        match self.adb.run("version").await {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(Error::tool_not_found(
                adb,
                format!("`adb version` failed: {}", result.diagnostic()),
            )),
            Err(e) => Err(Error::tool_not_found(adb, e.to_string())),
        }
    }

    /// Device list if the daemon is running and no device is degraded
    async fn healthy_snapshot(&self) -> Option<DaemonHealth> {
        let result = match self.adb.run("devices").await {
            Ok(result) => result,
            Err(e) => {
                debug!("adb devices failed: {}", e);
                return None;
            }
        };

        if !result.clean() {
            debug!("adb daemon not clean: {}", result.diagnostic());
            return None;
        }

        let health = DaemonHealth {
            devices: parse_device_rows(&result.stdout),
        };
        if health.has_degraded() {
            warn!("Degraded adb devices: {:?}", health.devices);
            return None;
        }
        Some(health)
    }

    async fn restart(&self) -> Result<DaemonHealth> {
        warn!("Restarting adb daemon");
        let interval = self.budgets.interval();

        let result = self.adb.run("kill-server").await?;
        if !result.success() {
            debug!("adb kill-server: {}", result.diagnostic());
        }

        let ports = &self.ports;
        PollSpec::new("adb daemon to stop", self.budgets.daemon_stop)
            .interval(interval)
            .assume_satisfied_on_error()
            .run(move || async move { ports.is_port_available(ADB_SERVER_PORT).await })
            .await?;

        let result = self.adb.run("start-server").await?;
        if !result.success() {
            warn!("adb start-server: {}", result.diagnostic());
        }

        PollSpec::new("adb daemon to respond", self.budgets.daemon_start)
            .interval(interval)
            .run(move || async move { self.is_daemon_running().await })
            .await?;

        let latest = std::sync::Mutex::new(DaemonHealth::default());
        let slot = &latest;
        PollSpec::new("adb devices to leave offline/unauthorized", self.budgets.daemon_health)
            .interval(interval)
            .run(move || async move {
                let health = self.classify_devices().await?;
                let settled = !health.has_degraded();
                if let Ok(mut guard) = slot.lock() {
                    *guard = health;
                }
                Ok(settled)
            })
            .await?;

        let health = latest.into_inner().unwrap_or_else(|e| e.into_inner());
        info!("adb daemon restarted ({} devices)", health.devices.len());
        Ok(health)
    }
}
