//! Target application lifecycle: force-stop, launch, foreground verification
//!
//! Each platform implements [`AppLifecycle`]; [`AppLifecycleController`] runs
//! the shared stop/verify/launch/verify sequence on top of it.

use rig_core::prelude::*;
use rig_core::{PollBudgets, PollSpec};

use crate::adb::Adb;
use crate::process::ProcessExecutor;
use crate::simulators::Simctl;

/// Outcome of a single foreground check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Yes,
    No,
    /// The check ran but could not decide; try the fallback
    Inconclusive,
}

/// Platform-specific control of the app under test
#[trait_variant::make(AppLifecycle: Send)]
pub trait LocalAppLifecycle {
    /// Package name or bundle identifier
    fn app_id(&self) -> &str;

    async fn force_stop(&self) -> Result<()>;

    async fn launch(&self) -> Result<()>;

    /// Primary foreground check
    async fn foreground(&self) -> Result<Probe>;

    /// Secondary check used when the primary one is inconclusive
    async fn foreground_fallback(&self) -> Result<Probe>;
}

/// Primary check, then the fallback if the primary cannot decide
pub async fn is_foreground<A: AppLifecycle + Sync>(app: &A) -> Result<bool> {
    match app.foreground().await? {
        Probe::Yes => Ok(true),
        Probe::No => Ok(false),
        Probe::Inconclusive => {
            trace!("Foreground check for {} inconclusive, using fallback", app.app_id());
            Ok(app.foreground_fallback().await? == Probe::Yes)
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Android
// ─────────────────────────────────────────────────────────────────

/// Inspect `dumpsys window` focus lines for `package`
///
/// ```text
///   mCurrentFocus=Window{5d2c1a u0 com.example.shop/com.example.shop.MainActivity}
///   mFocusedApp=ActivityRecord{8e1f7b u0 com.example.shop/.MainActivity t42}
/// ```
pub fn parse_window_focus(output: &str, package: &str) -> Probe {
    let focus: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("mCurrentFocus") || line.starts_with("mFocusedApp"))
        .filter(|line| !line.ends_with("=null"))
        .collect();

    if focus.is_empty() {
        return Probe::Inconclusive;
    }

    let needle = format!("{}/", package);
    if focus.iter().any(|line| line.contains(&needle)) {
        Probe::Yes
    } else {
        Probe::No
    }
}

pub struct AndroidApp<E> {
    adb: Adb<E>,
    serial: String,
    package: String,
    activity: Option<String>,
}

impl<E: ProcessExecutor> AndroidApp<E> {
    pub fn new(
        adb: Adb<E>,
        serial: impl Into<String>,
        package: impl Into<String>,
        activity: Option<String>,
    ) -> Self {
        Self {
            adb,
            serial: serial.into(),
            package: package.into(),
            activity,
        }
    }

    fn launch_command(&self) -> String {
        match &self.activity {
            Some(activity) => format!("am start -W -n {}/{}", self.package, activity),
            None => format!(
                "monkey -p {} -c android.intent.category.LAUNCHER 1",
                self.package
            ),
        }
    }
}

impl<E: ProcessExecutor + Sync> AppLifecycle for AndroidApp<E> {
    fn app_id(&self) -> &str {
        &self.package
    }

    async fn force_stop(&self) -> Result<()> {
        let result = self
            .adb
            .shell(&self.serial, &format!("am force-stop {}", self.package))
            .await?;
        if !result.success() {
            return Err(Error::process(format!(
                "am force-stop {} failed: {}",
                self.package,
                result.diagnostic()
            )));
        }
        Ok(())
    }

    async fn launch(&self) -> Result<()> {
        let result = self.adb.shell(&self.serial, &self.launch_command()).await?;
        let output = format!("{}{}", result.stdout, result.stderr);
        if !result.success() || output.contains("Error") || output.contains("aborted") {
            return Err(Error::app_launch(&self.package, result.diagnostic()));
        }
        Ok(())
    }

    async fn foreground(&self) -> Result<Probe> {
        let result = self.adb.shell(&self.serial, "dumpsys window").await?;
        if !result.success() {
            return Err(Error::process(format!(
                "dumpsys window failed: {}",
                result.diagnostic()
            )));
        }
        Ok(parse_window_focus(&result.stdout, &self.package))
    }

    async fn foreground_fallback(&self) -> Result<Probe> {
        let result = self
            .adb
            .shell(&self.serial, &format!("pidof {}", self.package))
            .await?;
        let running = result.success()
            && result
                .stdout_trimmed()
                .split_whitespace()
                .any(|pid| pid.parse::<u32>().is_ok());
        Ok(if running { Probe::Yes } else { Probe::No })
    }
}

// ─────────────────────────────────────────────────────────────────
// iOS
// ─────────────────────────────────────────────────────────────────

/// Find the app's `UIKitApplication:<bundle>[...]` row in `launchctl list`
///
/// The first column is the pid, or `-` for an app that is registered but not
/// running.
pub fn parse_launchctl_app(output: &str, bundle_id: &str) -> Probe {
    let label = format!("UIKitApplication:{}[", bundle_id);
    match output.lines().find(|line| line.contains(&label)) {
        Some(row) => match row.split_whitespace().next() {
            Some(pid) if pid.parse::<u32>().is_ok() => Probe::Yes,
            _ => Probe::No,
        },
        None => Probe::Inconclusive,
    }
}

pub struct IosApp<E> {
    simctl: Simctl<E>,
    udid: String,
    bundle_id: String,
}

impl<E: ProcessExecutor> IosApp<E> {
    pub fn new(simctl: Simctl<E>, udid: impl Into<String>, bundle_id: impl Into<String>) -> Self {
        Self {
            simctl,
            udid: udid.into(),
            bundle_id: bundle_id.into(),
        }
    }
}

impl<E: ProcessExecutor + Sync> AppLifecycle for IosApp<E> {
    fn app_id(&self) -> &str {
        &self.bundle_id
    }

    /// Terminating an app that is not running fails; that is fine here
    async fn force_stop(&self) -> Result<()> {
        let result = self.simctl.terminate(&self.udid, &self.bundle_id).await?;
        if !result.success() {
            debug!("terminate {}: {}", self.bundle_id, result.diagnostic());
        }
        Ok(())
    }

    async fn launch(&self) -> Result<()> {
        let result = self.simctl.launch(&self.udid, &self.bundle_id).await?;
        if !result.success() {
            return Err(Error::app_launch(&self.bundle_id, result.diagnostic()));
        }
        Ok(())
    }

    async fn foreground(&self) -> Result<Probe> {
        let services = self.simctl.launchctl_list(&self.udid).await?;
        Ok(parse_launchctl_app(&services, &self.bundle_id))
    }

    /// An app without a container is not installed, so not in the foreground.
    /// A container alone does not prove the app is running.
    async fn foreground_fallback(&self) -> Result<Probe> {
        let result = self
            .simctl
            .get_app_container(&self.udid, &self.bundle_id)
            .await?;
        Ok(if result.success() {
            Probe::Inconclusive
        } else {
            Probe::No
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────

/// Restarts the app under test and verifies it owns the screen
pub struct AppLifecycleController<A> {
    app: A,
    budgets: PollBudgets,
}

impl<A: AppLifecycle + Sync> AppLifecycleController<A> {
    pub fn new(app: A, budgets: PollBudgets) -> Self {
        Self { app, budgets }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    /// Force-stop, confirm stopped, launch, confirm in the foreground
    ///
    /// The stop confirmation treats a failing check as stopped. A launch that
    /// errors or never reaches the foreground is an [`Error::AppLaunch`].
    pub async fn ensure_foreground(&self) -> Result<()> {
        let app = &self.app;
        let interval = self.budgets.interval();
        info!("Restarting {}", app.app_id());

        app.force_stop().await?;

        PollSpec::new(format!("{} to leave the foreground", app.app_id()), self.budgets.app_stop)
            .interval(interval)
            .assume_satisfied_on_error()
            .run(move || async move { Ok(!is_foreground(app).await?) })
            .await?;

        app.launch().await?;

        PollSpec::new(format!("{} in the foreground", app.app_id()), self.budgets.app_launch)
            .interval(interval)
            .run(move || async move { is_foreground(app).await })
            .await
            .map_err(|e| match e {
                Error::PollTimeout { attempts, .. } => Error::app_launch(
                    app.app_id(),
                    format!("not in the foreground after {} checks", attempts),
                ),
                other => other,
            })?;

        info!("{} is in the foreground", app.app_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_launchctl_app, parse_window_focus, AndroidApp, AppLifecycleController, IosApp, Probe,
    };
    use crate::adb::Adb;
    use crate::simulators::Simctl;
    use crate::test_utils::{fake_tools, FakeExecutor};
    use rig_core::{CommandResult, Error, PollBudgets};
    use std::sync::Arc;

    const PKG: &str = "com.example.shop.stage";

    fn focus(package: &str) -> CommandResult {
        CommandResult::ok(format!(
            "WINDOW MANAGER WINDOWS (dumpsys window windows)\n  mCurrentFocus=Window{{5d2c1a u0 {0}/{0}.MainActivity}}\n  mFocusedApp=ActivityRecord{{8e1f7b u0 {0}/.MainActivity t42}}\n",
            package
        ))
    }

    fn android(fake: &Arc<FakeExecutor>, activity: Option<&str>) -> AppLifecycleController<AndroidApp<FakeExecutor>> {
        let app = AndroidApp::new(
            Adb::new(Arc::clone(fake), &fake_tools()),
            "emulator-5554",
            PKG,
            activity.map(str::to_string),
        );
        AppLifecycleController::new(app, PollBudgets::default())
    }

    #[test]
    fn test_parse_window_focus() {
        assert_eq!(parse_window_focus(&focus(PKG).stdout, PKG), Probe::Yes);
        assert_eq!(
            parse_window_focus(&focus("com.google.android.apps.nexuslauncher").stdout, PKG),
            Probe::No
        );
        assert_eq!(
            parse_window_focus("  mCurrentFocus=null\n  mFocusedApp=null\n", PKG),
            Probe::Inconclusive
        );
    }

    #[test]
    fn test_focus_requires_exact_package() {
        // com.example.shop.stage must not match com.example.shop.stage2
        let other = focus("com.example.shop.stage2").stdout;
        assert_eq!(parse_window_focus(&other, PKG), Probe::No);
    }

    #[test]
    fn test_parse_launchctl_app() {
        let output = "PID\tStatus\tLabel\n4242\t0\tUIKitApplication:com.example.shop.stage[0x1a2b][rb-legacy]\n-\t0\tUIKitApplication:com.apple.mobilesafari[0x9f][rb-legacy]\n";
        assert_eq!(parse_launchctl_app(output, PKG), Probe::Yes);
        assert_eq!(parse_launchctl_app(output, "com.apple.mobilesafari"), Probe::No);
        assert_eq!(parse_launchctl_app(output, "com.apple.Maps"), Probe::Inconclusive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_app_is_stopped_then_relaunched() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("dumpsys window", focus(PKG))
            .on("am force-stop", CommandResult::ok(""))
            .after("am force-stop", "dumpsys window", focus("com.google.android.apps.nexuslauncher"))
            .on("am start -W", CommandResult::ok("Starting: Intent { cmp=com.example.shop.stage/.MainActivity }\nStatus: ok\n"))
            .after("am start -W", "dumpsys window", focus(PKG));

        android(&fake, Some(".MainActivity"))
            .ensure_foreground()
            .await
            .unwrap();

        let calls = fake.calls();
        let stop = calls.iter().position(|c| c.contains("am force-stop")).unwrap();
        let launch = calls.iter().position(|c| c.contains("am start -W -n com.example.shop.stage/.MainActivity")).unwrap();
        assert!(stop < launch);
        // one check after the stop, one after the launch
        assert_eq!(fake.count("dumpsys window"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconclusive_focus_falls_back_to_pidof() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("dumpsys window", CommandResult::ok("  mCurrentFocus=null\n"))
            .on("am force-stop", CommandResult::ok(""))
            .on("pidof", CommandResult::failed(1, ""))
            .on("monkey -p", CommandResult::ok("Events injected: 1"))
            .after("monkey -p", "pidof", CommandResult::ok("12345\n"));

        android(&fake, None).ensure_foreground().await.unwrap();
        assert!(fake.called("monkey -p com.example.shop.stage -c android.intent.category.LAUNCHER 1"));
        assert!(fake.called("pidof com.example.shop.stage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_check_failure_assumes_stopped() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("am force-stop", CommandResult::ok(""))
            .on_error("dumpsys window", "connection reset")
            .after("am start", "dumpsys window", focus(PKG))
            .on("am start", CommandResult::ok("Status: ok"));

        android(&fake, Some(".MainActivity"))
            .ensure_foreground()
            .await
            .unwrap();
        assert!(fake.called("am start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_error_output_is_app_launch_failure() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("dumpsys window", focus("com.google.android.apps.nexuslauncher"))
            .on("am force-stop", CommandResult::ok(""))
            .on(
                "am start",
                CommandResult::ok("Error: Activity class {com.example.shop.stage/.Missing} does not exist."),
            );

        let err = android(&fake, Some(".Missing"))
            .ensure_foreground()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppLaunch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_foreground_becomes_app_launch_failure() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("dumpsys window", focus("com.google.android.apps.nexuslauncher"))
            .on("am force-stop", CommandResult::ok(""))
            .on("am start", CommandResult::ok("Status: ok"));

        let err = android(&fake, Some(".MainActivity"))
            .ensure_foreground()
            .await
            .unwrap_err();
        match err {
            Error::AppLaunch { app, message } => {
                assert_eq!(app, PKG);
                assert!(message.contains(&PollBudgets::default().app_launch.to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_restart_sequence() {
        let fake = Arc::new(FakeExecutor::new());
        let running = "PID\tStatus\tLabel\n4242\t0\tUIKitApplication:com.example.shop.stage[0x1a2b][rb-legacy]\n";
        fake.on("launchctl list", CommandResult::ok(running))
            .on("simctl terminate", CommandResult::ok(""))
            .after("simctl terminate", "launchctl list", CommandResult::ok("PID\tStatus\tLabel\n"))
            .on("get_app_container", CommandResult::ok("/Users/ci/Library/Developer/CoreSimulator/..."))
            .on("simctl launch", CommandResult::ok("com.example.shop.stage: 4300"))
            .after("simctl launch", "launchctl list", CommandResult::ok(running));

        let app = IosApp::new(Simctl::new(Arc::clone(&fake)), "UDID-1", PKG);
        AppLifecycleController::new(app, PollBudgets::default())
            .ensure_foreground()
            .await
            .unwrap();

        assert!(fake.called("xcrun simctl terminate UDID-1 com.example.shop.stage"));
        assert!(fake.called("xcrun simctl launch UDID-1 com.example.shop.stage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_terminate_of_stopped_app_is_tolerated() {
        let fake = Arc::new(FakeExecutor::new());
        fake.on("launchctl list", CommandResult::ok("PID\tStatus\tLabel\n"))
            .on("simctl terminate", CommandResult::failed(3, "found nothing to terminate"))
            .on("get_app_container", CommandResult::failed(2, "No such file"))
            .on("simctl launch", CommandResult::failed(4, "The request was denied by service delegate"));

        let app = IosApp::new(Simctl::new(Arc::clone(&fake)), "UDID-1", PKG);
        let err = AppLifecycleController::new(app, PollBudgets::default())
            .ensure_foreground()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppLaunch { .. }));
    }
}
