//! Environment bring-up and teardown
//!
//! [`Rig::setup`] runs the full sequence for one test worker:
//! server start, device readiness, app restart and foreground check,
//! capabilities, then session creation. Any failure after the server started
//! stops it again before the error is returned.

use std::future::Future;
use std::sync::Arc;

use rig_core::prelude::*;
use rig_core::{EnvironmentConfig, PollBudgets};
use rig_device::{PlatformRig, ProcessExecutor, ToolAvailability};

use crate::capabilities::Capabilities;
use crate::config::Settings;
use crate::driver::SessionFactory;
use crate::registry::{SessionContext, SessionGuard, SessionRegistry};
use crate::server::{ServerConfig, ServerLifecycleManager, StatusProbe};

/// Brings one test environment up and down
pub struct Rig<E, P, F> {
    config: EnvironmentConfig,
    budgets: PollBudgets,
    server: ServerLifecycleManager<E, P>,
    platform: PlatformRig<E>,
    factory: F,
}

impl<E, P, F> Rig<E, P, F>
where
    E: ProcessExecutor + Sync,
    P: StatusProbe + Sync,
    F: SessionFactory + Sync,
{
    pub fn new(
        config: EnvironmentConfig,
        budgets: PollBudgets,
        server: ServerLifecycleManager<E, P>,
        platform: PlatformRig<E>,
        factory: F,
    ) -> Self {
        Self {
            config,
            budgets,
            server,
            platform,
            factory,
        }
    }

    /// Resolve `settings` and wire every component to `executor`
    pub fn from_settings(
        settings: &Settings,
        executor: Arc<E>,
        tools: ToolAvailability,
        probe: P,
        factory: F,
    ) -> Result<Self> {
        let config = settings.resolve()?;
        let budgets = settings.polling.clone();

        let server_config = ServerConfig::from_settings(&settings.server, &tools, &budgets);
        let server =
            ServerLifecycleManager::new(Arc::clone(&executor), probe, server_config, &budgets);
        let platform = PlatformRig::for_platform(config.platform, executor, tools, budgets.clone());

        Ok(Self::new(config, budgets, server, platform, factory))
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerLifecycleManager<E, P> {
        &self.server
    }

    pub fn platform(&self) -> &PlatformRig<E> {
        &self.platform
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Bring the environment up and create a driver session
    pub async fn setup(&mut self) -> Result<SessionContext<F::Handle>> {
        info!(
            "Bringing up {} {} '{}' for {} ({})",
            self.config.platform,
            self.config.device_kind,
            self.config.device_name,
            self.config.app_id,
            self.config.environment
        );

        self.server.start().await?;

        match self.bring_up_session().await {
            Ok(ctx) => {
                info!("Environment ready on {}", ctx.device.label());
                Ok(ctx)
            }
            Err(e) => {
                error!("Bring-up failed: {}", e);
                self.server.stop().await;
                Err(e)
            }
        }
    }

    async fn bring_up_session(&mut self) -> Result<SessionContext<F::Handle>> {
        let device = self.platform.prepare_device(&self.config).await?;

        self.platform
            .ensure_app_foreground(&self.config, &device, &self.budgets)
            .await?;

        let capabilities = Capabilities::for_session(&self.config, &device);
        let capabilities_json = capabilities.to_json()?;
        let server_url = self.server.handle().url().to_string();

        let handle = self.factory.create(&server_url, &capabilities).await?;

        Ok(SessionContext {
            device,
            server_url,
            capabilities: capabilities_json,
            handle,
        })
    }

    /// [`Rig::setup`], then store the handle in the calling thread's slot
    ///
    /// The slot belongs to whichever thread polls this future when it
    /// completes. Drive it with [`run_blocking`] or a current-thread runtime
    /// on the test thread; on a multi-thread runtime the handle can land in a
    /// worker thread's slot and [`SessionRegistry::get`] on the test thread
    /// will not find it.
    pub async fn setup_in<'r>(
        &mut self,
        registry: &'r SessionRegistry<F::Handle>,
    ) -> Result<(SessionContext<F::Handle>, SessionGuard<'r, F::Handle>)> {
        let ctx = self.setup().await?;
        let guard = registry.set(ctx.handle.clone());
        Ok((ctx, guard))
    }

    /// Close the driver session, then stop the server
    ///
    /// The server is stopped even when closing the session fails; that
    /// failure is returned afterwards.
    pub async fn teardown(&mut self, ctx: SessionContext<F::Handle>) -> Result<()> {
        let closed = self.factory.close(&ctx.handle).await;
        if let Err(e) = &closed {
            warn!("Failed to close session: {}", e);
        }

        self.server.stop().await;
        info!("Environment on {} torn down", ctx.device.label());
        closed
    }
}

/// Block the calling thread on `future` using its own single-threaded runtime
///
/// Each test worker thread gets an independent runtime, so per-thread session
/// slots line up with the thread that ran the bring-up.
pub fn run_blocking<T>(future: impl Future<Output = T>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
