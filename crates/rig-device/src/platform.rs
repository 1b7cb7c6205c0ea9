//! Platform selection
//!
//! [`PlatformRig`] picks the readiness orchestrator and app controller for the
//! configured platform once, at startup.

use std::sync::Arc;

use rig_core::prelude::*;
use rig_core::{DeviceSession, EnvironmentConfig, Platform, PollBudgets};

use crate::android::AndroidReadinessOrchestrator;
use crate::app::{AndroidApp, AppLifecycleController, IosApp};
use crate::ios::IosReadinessOrchestrator;
use crate::process::ProcessExecutor;
use crate::tool_availability::ToolAvailability;

pub enum PlatformRig<E> {
    Android(AndroidReadinessOrchestrator<E>),
    Ios(IosReadinessOrchestrator<E>),
}

impl<E: ProcessExecutor + Sync> PlatformRig<E> {
    pub fn for_platform(
        platform: Platform,
        executor: Arc<E>,
        tools: ToolAvailability,
        budgets: PollBudgets,
    ) -> Self {
        match platform {
            Platform::Android => {
                PlatformRig::Android(AndroidReadinessOrchestrator::new(executor, tools, budgets))
            }
            Platform::IOS => PlatformRig::Ios(IosReadinessOrchestrator::new(executor, tools, budgets)),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformRig::Android(_) => Platform::Android,
            PlatformRig::Ios(_) => Platform::IOS,
        }
    }

    /// Run the platform's readiness sequence
    pub async fn prepare_device(&mut self, config: &EnvironmentConfig) -> Result<DeviceSession> {
        if config.platform != self.platform() {
            return Err(Error::config_invalid(format!(
                "environment targets {} but the rig was built for {}",
                config.platform,
                self.platform()
            )));
        }
        match self {
            PlatformRig::Android(android) => android.prepare(config).await,
            PlatformRig::Ios(ios) => ios.prepare(config).await,
        }
    }

    /// Restart the app under test on `device` and verify it is in the foreground
    pub async fn ensure_app_foreground(
        &self,
        config: &EnvironmentConfig,
        device: &DeviceSession,
        budgets: &PollBudgets,
    ) -> Result<()> {
        let target = device.label();
        match self {
            PlatformRig::Android(android) => {
                let app = AndroidApp::new(
                    android.adb().clone(),
                    target,
                    &config.app_id,
                    config.app_activity.clone(),
                );
                AppLifecycleController::new(app, budgets.clone())
                    .ensure_foreground()
                    .await
            }
            PlatformRig::Ios(ios) => {
                let app = IosApp::new(ios.simctl().clone(), target, &config.app_id);
                AppLifecycleController::new(app, budgets.clone())
                    .ensure_foreground()
                    .await
            }
        }
    }
}
