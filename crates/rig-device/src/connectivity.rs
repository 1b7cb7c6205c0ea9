//! WiFi and mobile data control on Android devices

use rig_core::prelude::*;
use rig_core::{PollBudgets, PollSpec};

use crate::adb::Adb;
use crate::process::ProcessExecutor;

/// Network interface toggled through `svc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Wifi,
    MobileData,
}

impl Interface {
    /// Global setting holding the interface state
    fn setting(&self) -> &'static str {
        match self {
            Interface::Wifi => "wifi_on",
            Interface::MobileData => "mobile_data",
        }
    }

    fn svc_name(&self) -> &'static str {
        match self {
            Interface::Wifi => "wifi",
            Interface::MobileData => "data",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interface::Wifi => "WiFi",
            Interface::MobileData => "mobile data",
        }
    }
}

/// Reads and toggles network interfaces over adb
pub struct AndroidConnectivity<E> {
    adb: Adb<E>,
    budgets: PollBudgets,
}

impl<E: ProcessExecutor> AndroidConnectivity<E> {
    pub fn new(adb: Adb<E>, budgets: PollBudgets) -> Self {
        Self { adb, budgets }
    }

    /// Whether `interface` is enabled on `serial`
    pub async fn is_enabled(&self, serial: &str, interface: Interface) -> Result<bool> {
        let result = self
            .adb
            .shell(serial, &format!("settings get global {}", interface.setting()))
            .await?;
        if !result.success() {
            return Err(Error::process(format!(
                "reading {} state on {} failed: {}",
                interface.label(),
                serial,
                result.diagnostic()
            )));
        }
        // wifi_on is 2 when WiFi stays on in airplane mode
        Ok(matches!(result.stdout_trimmed(), "1" | "2"))
    }

    pub async fn wifi_enabled(&self, serial: &str) -> Result<bool> {
        self.is_enabled(serial, Interface::Wifi).await
    }

    pub async fn mobile_data_enabled(&self, serial: &str) -> Result<bool> {
        self.is_enabled(serial, Interface::MobileData).await
    }

    /// Toggle `interface` and wait until the device reports the new state
    pub async fn set_enabled(&self, serial: &str, interface: Interface, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        let result = self
            .adb
            .shell(serial, &format!("svc {} {}", interface.svc_name(), action))
            .await?;
        if !result.success() {
            return Err(Error::process(format!(
                "svc {} {} failed on {}: {}",
                interface.svc_name(),
                action,
                serial,
                result.diagnostic()
            )));
        }

        PollSpec::new(
            format!("{} to be {}d on {}", interface.label(), action, serial),
            self.budgets.setting_change,
        )
        .interval(self.budgets.interval())
        .run(move || async move { Ok(self.is_enabled(serial, interface).await? == enabled) })
        .await?;

        info!("{} {}d on {}", interface.label(), action, serial);
        Ok(())
    }

    pub async fn set_wifi(&self, serial: &str, enabled: bool) -> Result<()> {
        self.set_enabled(serial, Interface::Wifi, enabled).await
    }

    pub async fn set_mobile_data(&self, serial: &str, enabled: bool) -> Result<()> {
        self.set_enabled(serial, Interface::MobileData, enabled).await
    }

    /// Fail with a fatal error unless WiFi is enabled
    pub async fn require_wifi(&self, serial: &str) -> Result<()> {
        if self.wifi_enabled(serial).await? {
            Ok(())
        } else {
            error!("WiFi is disabled on {}", serial);
            Err(Error::connectivity_disabled(serial, Interface::Wifi.label()))
        }
    }
}
