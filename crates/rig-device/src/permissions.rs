//! Runtime permission and app-ops control on Android devices

use std::fmt;

use rig_core::prelude::*;
use rig_core::{CommandResult, PollBudgets, PollSpec};

use crate::adb::Adb;
use crate::process::ProcessExecutor;

pub const FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
pub const COARSE_LOCATION: &str = "android.permission.ACCESS_COARSE_LOCATION";

/// App-ops names controlling location access
const LOCATION_OPS: [&str; 2] = ["FINE_LOCATION", "COARSE_LOCATION"];

/// Mode of an app-op, as printed and accepted by `appops`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppOpMode {
    Allow,
    Ignore,
    Deny,
    Default,
    /// Allowed only while the app is in the foreground
    Foreground,
}

impl AppOpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppOpMode::Allow => "allow",
            AppOpMode::Ignore => "ignore",
            AppOpMode::Deny => "deny",
            AppOpMode::Default => "default",
            AppOpMode::Foreground => "foreground",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "allow" => Some(AppOpMode::Allow),
            "ignore" => Some(AppOpMode::Ignore),
            "deny" => Some(AppOpMode::Deny),
            "default" => Some(AppOpMode::Default),
            "foreground" => Some(AppOpMode::Foreground),
            _ => None,
        }
    }
}

impl fmt::Display for AppOpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `appops get <package> <op>` output
///
/// ```text
/// FINE_LOCATION: foreground; time=+2m10s ago; duration=+12ms
/// ```
///
/// An op that was never set prints `No operations.` and is reported as
/// [`AppOpMode::Default`].
pub fn parse_app_op_mode(op: &str, output: &str) -> Option<AppOpMode> {
    let prefix = format!("{}:", op);
    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix(&prefix) {
            let token = rest.split(';').next().unwrap_or("").trim();
            return AppOpMode::parse(token);
        }
        if line.starts_with("No operations") {
            return Some(AppOpMode::Default);
        }
    }
    None
}

/// Grants, revokes and adjusts app permissions over adb
pub struct AndroidPermissions<E> {
    adb: Adb<E>,
    budgets: PollBudgets,
}

impl<E: ProcessExecutor> AndroidPermissions<E> {
    pub fn new(adb: Adb<E>, budgets: PollBudgets) -> Self {
        Self { adb, budgets }
    }

    pub async fn grant(&self, serial: &str, package: &str, permission: &str) -> Result<()> {
        let result = self
            .adb
            .shell(serial, &format!("pm grant {} {}", package, permission))
            .await?;
        check_pm(&result, "grant", package, permission)
    }

    pub async fn revoke(&self, serial: &str, package: &str, permission: &str) -> Result<()> {
        let result = self
            .adb
            .shell(serial, &format!("pm revoke {} {}", package, permission))
            .await?;
        check_pm(&result, "revoke", package, permission)
    }

    pub async fn set_app_op(
        &self,
        serial: &str,
        package: &str,
        op: &str,
        mode: AppOpMode,
    ) -> Result<()> {
        let result = self
            .adb
            .shell(serial, &format!("appops set {} {} {}", package, op, mode))
            .await?;
        if !result.clean() {
            return Err(Error::process(format!(
                "appops set {} {} {} failed: {}",
                package,
                op,
                mode,
                result.diagnostic()
            )));
        }
        Ok(())
    }

    pub async fn app_op_mode(&self, serial: &str, package: &str, op: &str) -> Result<AppOpMode> {
        let result = self
            .adb
            .shell(serial, &format!("appops get {} {}", package, op))
            .await?;
        if !result.success() {
            return Err(Error::process(format!(
                "appops get {} {} failed: {}",
                package,
                op,
                result.diagnostic()
            )));
        }
        parse_app_op_mode(op, &result.stdout).ok_or_else(|| {
            Error::process(format!(
                "unrecognised appops output for {}: {}",
                op,
                result.stdout_trimmed()
            ))
        })
    }

    /// Set `op` to `mode` and wait until the device reports it
    pub async fn set_app_op_verified(
        &self,
        serial: &str,
        package: &str,
        op: &str,
        mode: AppOpMode,
    ) -> Result<()> {
        self.set_app_op(serial, package, op, mode).await?;
        PollSpec::new(
            format!("{} {} to become {}", package, op, mode),
            self.budgets.setting_change,
        )
        .interval(self.budgets.interval())
        .run(move || async move { Ok(self.app_op_mode(serial, package, op).await? == mode) })
        .await?;
        Ok(())
    }

    /// Grant location access "only while using the app"
    ///
    /// Location ops are reset to `default` first, and the reset must be
    /// observed before switching to `foreground`; setting `foreground` on
    /// top of an unsettled reset is silently dropped by some system images.
    pub async fn grant_location_while_in_use(&self, serial: &str, package: &str) -> Result<()> {
        self.grant(serial, package, FINE_LOCATION).await?;
        self.grant(serial, package, COARSE_LOCATION).await?;

        for op in LOCATION_OPS {
            self.set_app_op_verified(serial, package, op, AppOpMode::Default)
                .await?;
            self.set_app_op_verified(serial, package, op, AppOpMode::Foreground)
                .await?;
        }

        info!("Location granted while in use for {} on {}", package, serial);
        Ok(())
    }
}

/// `pm` reports some failures with exit 0 and an exception on stdout
fn check_pm(result: &CommandResult, action: &str, package: &str, permission: &str) -> Result<()> {
    let output = format!("{}{}", result.stdout, result.stderr);
    if result.success() && !output.contains("Exception") && !output.contains("Error") {
        debug!("pm {} {} {}", action, package, permission);
        return Ok(());
    }
    Err(Error::process(format!(
        "pm {} {} {} failed: {}",
        action,
        package,
        permission,
        result.diagnostic()
    )))
}
