//! iOS simulator readiness
//!
//! Brings a named simulator to a state where the home screen is up and
//! optional security prompts are suppressed. Real iOS devices are rejected.

use std::sync::Arc;

use rig_core::prelude::*;
use rig_core::{DeviceKind, DeviceSession, EnvironmentConfig, Platform, PollBudgets, PollSpec};

use crate::process::ProcessExecutor;
use crate::simulators::{find_simulator, simulator_state, Simctl, SimulatorState, SPRINGBOARD};
use crate::tool_availability::ToolAvailability;

/// Steps of the simulator readiness sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IosState {
    VerifyExists,
    Booted,
    Shutdown,
    NotFound,
    Boot,
    SpringBoardReady,
    SecurityReset,
    Ready,
}

pub struct IosReadinessOrchestrator<E> {
    simctl: Simctl<E>,
    tools: ToolAvailability,
    budgets: PollBudgets,
    trace: Vec<IosState>,
}

impl<E: ProcessExecutor> IosReadinessOrchestrator<E> {
    pub fn new(executor: Arc<E>, tools: ToolAvailability, budgets: PollBudgets) -> Self {
        Self {
            simctl: Simctl::new(executor),
            tools,
            budgets,
            trace: Vec::new(),
        }
    }

    pub fn simctl(&self) -> &Simctl<E> {
        &self.simctl
    }

    /// States visited by the last [`prepare`](Self::prepare) call
    pub fn trace(&self) -> &[IosState] {
        &self.trace
    }

    fn transition(&mut self, state: IosState) {
        debug!("iOS readiness: {:?}", state);
        self.trace.push(state);
    }

    /// Bring the configured simulator to a ready state
    pub async fn prepare(&mut self, config: &EnvironmentConfig) -> Result<DeviceSession> {
        self.trace.clear();

        if config.device_kind == DeviceKind::Real {
            return Err(Error::unsupported(format!(
                "real iOS devices are not supported (requested '{}')",
                config.device_name
            )));
        }
        self.tools.require_simctl()?;

        self.transition(IosState::VerifyExists);
        let listing = self.simctl.list_devices().await?;
        let Some(entry) = find_simulator(&listing, &config.device_name, &config.platform_version)
        else {
            self.transition(IosState::NotFound);
            return Err(Error::no_device(format!(
                "no usable simulator named '{}' for iOS {}",
                config.device_name, config.platform_version
            )));
        };
        info!(
            "Found simulator {} ({}) in state {:?}",
            entry.name, entry.udid, entry.state
        );

        match entry.state {
            SimulatorState::Booted => self.transition(IosState::Booted),
            state => {
                self.transition(IosState::Shutdown);
                self.transition(IosState::Boot);
                if state == SimulatorState::Shutdown {
                    self.simctl.boot(&entry.udid).await?;
                }
                self.wait_for_boot(&entry.udid).await?;
                self.transition(IosState::Booted);
            }
        }

        self.simctl.open_simulator_app().await;

        self.wait_for_springboard(&entry.udid).await?;
        self.transition(IosState::SpringBoardReady);

        self.reset_security_features(&entry.udid).await;
        self.transition(IosState::SecurityReset);

        self.transition(IosState::Ready);
        info!("Simulator {} ready", entry.name);

        Ok(
            DeviceSession::new(
                Platform::IOS,
                DeviceKind::Virtual,
                &config.platform_version,
                &entry.name,
            )
            .with_identifier(entry.udid),
        )
    }

    async fn wait_for_boot(&self, udid: &str) -> Result<()> {
        let simctl = &self.simctl;
        PollSpec::new(format!("simulator {} to boot", udid), self.budgets.simulator_boot)
            .interval(self.budgets.interval())
            .run(move || async move {
                let listing = simctl.list_devices().await?;
                Ok(simulator_state(&listing, udid, None) == Some(SimulatorState::Booted))
            })
            .await?;
        Ok(())
    }

    /// Booted is not enough; the home screen service must be running
    async fn wait_for_springboard(&self, udid: &str) -> Result<()> {
        let simctl = &self.simctl;
        PollSpec::new(format!("SpringBoard on {}", udid), self.budgets.springboard)
            .interval(self.budgets.interval())
            .run(move || async move {
                let services = simctl.launchctl_list(udid).await?;
                Ok(services.contains(SPRINGBOARD))
            })
            .await?;
        Ok(())
    }

    /// Keychain, passcode and privacy resets only suppress optional prompts
    async fn reset_security_features(&self, udid: &str) {
        let steps = [
            ("keychain reset", self.simctl.keychain_reset(udid).await),
            ("passcode disable", self.simctl.disable_passcode(udid).await),
            ("privacy reset", self.simctl.privacy_reset(udid).await),
        ];

        for (step, outcome) in steps {
            match outcome {
                Ok(result) if result.success() => debug!("{} on {} done", step, udid),
                Ok(result) => warn!("{} on {} failed: {}", step, udid, result.diagnostic()),
                Err(e) => warn!("{} on {} failed: {}", step, udid, e),
            }
        }
    }
}
