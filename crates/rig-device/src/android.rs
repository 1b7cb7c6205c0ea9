//! Android device readiness
//!
//! Drives an emulator or a physical device from "unknown" to verified ready:
//!
//! ```text
//! Unchecked -> DaemonHealthy -> DeviceFound -> Responsive -> Ready
//!                            |              -> Unresponsive -> (virtual) spawn
//!                            -> DeviceAbsent -> (virtual) SpawnRequested
//!                                               -> Appeared -> Booted -> Ready
//! ```
//!
//! Physical devices are never spawned: absent or unresponsive hardware fails
//! immediately. Both paths end by checking WiFi is on.

use std::sync::{Arc, Mutex};

use rig_core::prelude::*;
use rig_core::{
    DeviceKind, DeviceSession, EnvironmentConfig, Platform, PollBudgets, PollSpec,
};

use crate::adb::{Adb, DaemonHealth, DaemonHealthMonitor};
use crate::avds::spawn_avd;
use crate::connectivity::AndroidConnectivity;
use crate::process::{ProcessExecutor, ProcessHandle};
use crate::tool_availability::ToolAvailability;

/// Readiness states, recorded in order as the orchestrator moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndroidState {
    Unchecked,
    DaemonHealthy,
    DeviceFound,
    DeviceAbsent,
    Responsive,
    Unresponsive,
    SpawnRequested,
    Appeared,
    Booted,
    Ready,
}

pub struct AndroidReadinessOrchestrator<E> {
    monitor: DaemonHealthMonitor<E>,
    adb: Adb<E>,
    connectivity: AndroidConnectivity<E>,
    tools: ToolAvailability,
    budgets: PollBudgets,
    trace: Vec<AndroidState>,
    emulator: Option<ProcessHandle>,
}

impl<E: ProcessExecutor> AndroidReadinessOrchestrator<E> {
    pub fn new(executor: Arc<E>, tools: ToolAvailability, budgets: PollBudgets) -> Self {
        let monitor = DaemonHealthMonitor::new(executor, tools.clone(), budgets.clone());
        let adb = monitor.adb().clone();
        Self {
            connectivity: AndroidConnectivity::new(adb.clone(), budgets.clone()),
            monitor,
            adb,
            tools,
            budgets,
            trace: Vec::new(),
            emulator: None,
        }
    }

    pub fn adb(&self) -> &Adb<E> {
        &self.adb
    }

    pub fn connectivity(&self) -> &AndroidConnectivity<E> {
        &self.connectivity
    }

    /// States visited by the last [`prepare`](Self::prepare) call
    pub fn trace(&self) -> &[AndroidState] {
        &self.trace
    }

    /// Emulator process started by this orchestrator, if any
    pub fn spawned_emulator(&mut self) -> Option<&mut ProcessHandle> {
        self.emulator.as_mut()
    }

    fn transition(&mut self, state: AndroidState) {
        debug!("Android readiness: {:?}", state);
        self.trace.push(state);
    }

    /// Bring the configured device to a ready state
    pub async fn prepare(&mut self, config: &EnvironmentConfig) -> Result<DeviceSession> {
        self.trace.clear();
        self.transition(AndroidState::Unchecked);

        let health = self.monitor.ensure_healthy().await?;
        self.transition(AndroidState::DaemonHealthy);

        let session = match config.device_kind {
            DeviceKind::Virtual => self.prepare_virtual(config, &health).await?,
            DeviceKind::Real => self.prepare_real(config, &health).await?,
        };

        let serial = session.label().to_string();
        self.connectivity.require_wifi(&serial).await?;

        self.transition(AndroidState::Ready);
        info!("Android device {} ready", serial);
        Ok(session)
    }

    async fn prepare_virtual(
        &mut self,
        config: &EnvironmentConfig,
        health: &DaemonHealth,
    ) -> Result<DeviceSession> {
        let avd = config.device_name.as_str();
        // Serials that must not be picked up again as the fresh instance
        let mut stale = Vec::new();

        match self.find_running_emulator(health, avd, &stale).await {
            Some(serial) => {
                self.transition(AndroidState::DeviceFound);
                if self.is_responsive(&serial).await {
                    self.transition(AndroidState::Responsive);
                    info!("Reusing running emulator {} ({})", serial, avd);
                    return Ok(virtual_session(config, serial));
                }
                self.transition(AndroidState::Unresponsive);
                warn!("Emulator {} ({}) is unresponsive, starting a fresh one", serial, avd);
                if !self.discard_emulator(&serial).await {
                    stale.push(serial);
                }
            }
            None => {
                self.transition(AndroidState::DeviceAbsent);
                info!("No running emulator for AVD {}", avd);
            }
        }

        self.transition(AndroidState::SpawnRequested);
        let handle = spawn_avd(self.adb.executor().as_ref(), &self.tools, avd).await?;

        let (serial, handle) = self.wait_for_appearance(avd, handle, &stale).await?;
        self.emulator = Some(handle);
        self.transition(AndroidState::Appeared);

        self.wait_for_boot(&serial).await?;
        self.transition(AndroidState::Booted);

        Ok(virtual_session(config, serial))
    }

    async fn prepare_real(
        &mut self,
        config: &EnvironmentConfig,
        health: &DaemonHealth,
    ) -> Result<DeviceSession> {
        let wanted = config.device_name.trim();
        let device = if wanted.is_empty() {
            health
                .healthy_devices()
                .find(|d| !d.is_emulator())
                .cloned()
        } else {
            health.find(wanted).cloned()
        };

        let Some(device) = device else {
            self.transition(AndroidState::DeviceAbsent);
            return Err(Error::no_device(if wanted.is_empty() {
                "no physical Android device connected".to_string()
            } else {
                format!("physical Android device '{}' not connected", wanted)
            }));
        };
        self.transition(AndroidState::DeviceFound);

        if !device.is_healthy() || !self.is_responsive(&device.serial).await {
            self.transition(AndroidState::Unresponsive);
            return Err(Error::device_unresponsive(format!(
                "{} ({})",
                device.serial, device.status
            )));
        }
        self.transition(AndroidState::Responsive);

        let version = self.check_real_device(config, &device.serial).await;
        let mut session = DeviceSession::new(
            Platform::Android,
            DeviceKind::Real,
            version,
            &device.serial,
        );
        session.identifier = Some(device.serial);
        Ok(session)
    }

    /// Serial of a running emulator whose AVD name is `avd`, skipping `exclude`
    async fn find_running_emulator(
        &self,
        health: &DaemonHealth,
        avd: &str,
        exclude: &[String],
    ) -> Option<String> {
        let candidates = health
            .devices
            .iter()
            .filter(|d| d.is_emulator() && !exclude.contains(&d.serial));
        for device in candidates {
            match self.avd_name(&device.serial).await {
                Some(name) if name == avd => return Some(device.serial.clone()),
                Some(name) => trace!("{} runs AVD {}", device.serial, name),
                None => {}
            }
        }
        None
    }

    /// `adb -s <serial> emu avd name` prints the name then `OK`
    async fn avd_name(&self, serial: &str) -> Option<String> {
        match self.adb.on_device(serial, "emu avd name").await {
            Ok(result) if result.success() => result
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty() && *line != "OK")
                .map(str::to_string),
            Ok(result) => {
                debug!("emu avd name on {}: {}", serial, result.diagnostic());
                None
            }
            Err(e) => {
                debug!("emu avd name on {} failed: {}", serial, e);
                None
            }
        }
    }

    /// A trivial shell round trip
    async fn is_responsive(&self, serial: &str) -> bool {
        match self.adb.shell(serial, "echo ok").await {
            Ok(result) => result.success() && result.stdout_trimmed() == "ok",
            Err(e) => {
                debug!("Responsiveness probe on {} failed: {}", serial, e);
                false
            }
        }
    }

    /// Kill an unusable emulator and wait for it to leave the device list
    ///
    /// Returns false when the serial is still listed once the wait ends.
    async fn discard_emulator(&self, serial: &str) -> bool {
        match self.adb.on_device(serial, "emu kill").await {
            Ok(result) if !result.success() => {
                warn!("emu kill on {}: {}", serial, result.diagnostic())
            }
            Err(e) => warn!("emu kill on {} failed: {}", serial, e),
            Ok(_) => {}
        }

        let adb = &self.adb;
        let gone = PollSpec::new(format!("{} to shut down", serial), self.budgets.daemon_stop)
            .interval(self.budgets.interval())
            .assume_satisfied_on_error()
            .run(move || async move {
                Ok(!adb.devices().await?.iter().any(|d| d.serial == serial))
            })
            .await;
        match gone {
            Ok(_) => true,
            Err(e) => {
                warn!("{} still listed after emu kill: {}", serial, e);
                false
            }
        }
    }

    async fn wait_for_appearance(
        &self,
        avd: &str,
        handle: ProcessHandle,
        stale: &[String],
    ) -> Result<(String, ProcessHandle)> {
        let spawned = Mutex::new(handle);
        let found: Mutex<Option<String>> = Mutex::new(None);
        let (spawned_ref, found_ref) = (&spawned, &found);

        PollSpec::new(format!("emulator {} to appear", avd), self.budgets.device_appear)
            .interval(self.budgets.interval())
            .run(move || async move {
                let exited = spawned_ref
                    .lock()
                    .map(|mut handle| handle.has_exited())
                    .unwrap_or(false);
                if exited {
                    return Err(Error::no_device(format!(
                        "emulator for AVD {} exited during startup",
                        avd
                    )));
                }

                let health = DaemonHealth {
                    devices: self.adb.devices().await?,
                };
                let serial = self.find_running_emulator(&health, avd, stale).await;
                let appeared = serial.is_some();
                if let Ok(mut slot) = found_ref.lock() {
                    *slot = serial;
                }
                Ok(appeared)
            })
            .await?;

        let serial = found
            .into_inner()
            .ok()
            .flatten()
            .ok_or_else(|| Error::no_device(format!("emulator {} did not register", avd)))?;
        let handle = spawned.into_inner().unwrap_or_else(|e| e.into_inner());
        info!("Emulator {} appeared as {}", avd, serial);
        Ok((serial, handle))
    }

    /// Boot is complete once `sys.boot_completed` is 1 and the package
    /// manager answers
    async fn wait_for_boot(&self, serial: &str) -> Result<()> {
        let adb = &self.adb;
        PollSpec::new(format!("{} to finish booting", serial), self.budgets.device_boot)
            .interval(self.budgets.interval())
            .run(move || async move {
                let prop = adb.shell(serial, "getprop sys.boot_completed").await?;
                if prop.stdout_trimmed() != "1" {
                    return Ok(false);
                }
                let packages = adb.shell(serial, "pm list packages").await?;
                Ok(packages.success() && packages.stdout.contains("package:"))
            })
            .await?;
        Ok(())
    }

    /// Read version and model of a physical device; mismatches only warn
    async fn check_real_device(&self, config: &EnvironmentConfig, serial: &str) -> String {
        let version = self.getprop(serial, "ro.build.version.release").await;
        let model = self.getprop(serial, "ro.product.model").await;

        match &version {
            Some(actual) if !config.platform_version.is_empty() && *actual != config.platform_version => {
                warn!(
                    "Device {} runs Android {}, configured for {}",
                    serial, actual, config.platform_version
                );
            }
            None => warn!("Could not read Android version of {}", serial),
            _ => {}
        }
        if let Some(model) = model {
            info!("Physical device {} is a {}", serial, model);
        }

        version.unwrap_or_else(|| config.platform_version.clone())
    }

    async fn getprop(&self, serial: &str, prop: &str) -> Option<String> {
        match self.adb.shell(serial, &format!("getprop {}", prop)).await {
            Ok(result) if result.success() && !result.stdout_trimmed().is_empty() => {
                Some(result.stdout_trimmed().to_string())
            }
            _ => None,
        }
    }
}

fn virtual_session(config: &EnvironmentConfig, serial: String) -> DeviceSession {
    DeviceSession::new(
        Platform::Android,
        DeviceKind::Virtual,
        &config.platform_version,
        &config.device_name,
    )
    .with_identifier(serial)
}
