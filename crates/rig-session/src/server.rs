//! Automation server lifecycle
//!
//! [`ServerLifecycleManager`] reserves the server port, starts the server as a
//! background process, and only reports it running once the `/status`
//! endpoint answers. A failed start is diagnosed: a port taken over by a
//! process outside the spawned server's process tree is reported as
//! [`Error::PortStolen`], anything else as [`Error::Server`] naming the
//! server log.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use rig_core::prelude::*;
use rig_core::{PollBudgets, PollSpec};
use rig_device::{
    CommandSpec, HostOs, PortManager, ProcessExecutor, ProcessHandle, SpawnSpec, ToolAvailability,
};

use crate::config::ServerSettings;

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// How to start the automation server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub base_path: String,
    pub allow_insecure: Vec<String>,
    pub relaxed_security: bool,
    /// Server executable
    pub binary: String,
    pub log_dir: PathBuf,
    pub start_attempts: u32,
    pub interval: Duration,
}

impl ServerConfig {
    pub fn from_settings(
        settings: &ServerSettings,
        tools: &ToolAvailability,
        budgets: &PollBudgets,
    ) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            log_level: settings.log_level.clone(),
            base_path: settings.base_path.clone(),
            allow_insecure: settings.allow_insecure.clone(),
            relaxed_security: settings.relaxed_security,
            binary: settings
                .binary
                .clone()
                .unwrap_or_else(|| tools.appium().to_string()),
            log_dir: settings
                .log_dir
                .clone()
                .unwrap_or_else(|| rig_core::logging::get_log_directory().join("server")),
            start_attempts: budgets.server_start,
            interval: budgets.interval(),
        }
    }

    /// Root URL sessions are created against
    pub fn base_url(&self) -> String {
        let path = self.base_path.trim_end_matches('/');
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    pub fn status_url(&self) -> String {
        format!("{}/status", self.base_url())
    }

    /// Per-port log file, so parallel servers never share one
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("appium-{}.log", self.port))
    }

    pub fn command(&self) -> CommandSpec {
        let mut args = vec![
            "--address".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--log-level".to_string(),
            self.log_level.clone(),
            "--base-path".to_string(),
            self.base_path.clone(),
        ];
        if !self.allow_insecure.is_empty() {
            args.push("--allow-insecure".to_string());
            args.push(self.allow_insecure.join(","));
        }
        if self.relaxed_security {
            args.push("--relaxed-security".to_string());
        }
        CommandSpec::argv(&self.binary, args)
    }
}

/// Lifecycle state of the automation server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    /// Set only after the status endpoint answered
    Running,
    Failed,
}

/// The server process owned by a test worker
#[derive(Debug)]
pub struct ServerHandle {
    host: String,
    port: u16,
    url: String,
    state: ServerState,
    log_path: PathBuf,
    process: Option<ProcessHandle>,
}

impl ServerHandle {
    fn new(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            url: config.base_url(),
            state: ServerState::Stopped,
            log_path: config.log_path(),
            process: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }
}

/// Asks a running server whether it is ready for sessions
#[trait_variant::make(StatusProbe: Send)]
pub trait LocalStatusProbe {
    /// `Ok(false)` while the server is not answering yet
    async fn is_ready(&self, status_url: &str) -> Result<bool>;
}

/// `GET /status` over HTTP
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    value: StatusValue,
}

#[derive(Debug, Default, Deserialize)]
struct StatusValue {
    ready: Option<bool>,
    message: Option<String>,
}

impl HttpStatusProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(STATUS_TIMEOUT)
            .build()
            .map_err(|e| Error::server(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl StatusProbe for HttpStatusProbe {
    async fn is_ready(&self, status_url: &str) -> Result<bool> {
        let response = match self.client.get(status_url).send().await {
            Ok(r) => r,
            Err(e) => {
                trace!("{} not answering: {}", status_url, e);
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            debug!("{} returned {}", status_url, response.status());
            return Ok(false);
        }

        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| Error::server(format!("Unreadable status from {}: {}", status_url, e)))?;

        if let Some(message) = &status.value.message {
            debug!("Server status: {}", message);
        }
        Ok(status.value.ready.unwrap_or(true))
    }
}

/// Starts, verifies, diagnoses and stops one automation server
pub struct ServerLifecycleManager<E, P> {
    executor: Arc<E>,
    ports: PortManager<E>,
    probe: P,
    config: ServerConfig,
    handle: ServerHandle,
}

impl<E: ProcessExecutor + Sync, P: StatusProbe + Sync> ServerLifecycleManager<E, P> {
    pub fn new(executor: Arc<E>, probe: P, config: ServerConfig, budgets: &PollBudgets) -> Self {
        Self {
            ports: PortManager::new(Arc::clone(&executor), budgets),
            executor,
            probe,
            handle: ServerHandle::new(&config),
            config,
        }
    }

    /// Use the port tooling of `os` instead of the running host's
    pub fn with_host_os(mut self, os: HostOs) -> Self {
        self.ports = self.ports.with_os(os);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    pub fn state(&self) -> ServerState {
        self.handle.state
    }

    pub fn ports(&self) -> &PortManager<E> {
        &self.ports
    }

    /// Make sure nothing is listening on `port`
    pub async fn prepare_for_port(&self, port: u16) -> Result<()> {
        if self.ports.is_port_available(port).await? {
            debug!("Port {} is free", port);
            return Ok(());
        }

        warn!("Port {} is taken by a stale process, freeing it", port);
        self.ports.kill_process_on_port(port).await.map_err(|e| match e {
            Error::Port { .. } => e,
            other => Error::port(port, other.to_string()),
        })
    }

    /// Start the server and wait until its status endpoint answers
    pub async fn start(&mut self) -> Result<&ServerHandle> {
        if self.handle.state == ServerState::Running {
            debug!("Server on port {} already running", self.config.port);
            return Ok(&self.handle);
        }

        self.prepare_for_port(self.config.port).await?;

        let spec = SpawnSpec::new(self.config.command())
            .log_to(self.config.log_path())
            .kill_on_drop(true);

        info!("Starting automation server on {}", self.config.base_url());
        self.handle.state = ServerState::Starting;
        let process = match self.executor.spawn(&spec).await {
            Ok(process) => process,
            Err(e) => {
                self.handle.state = ServerState::Failed;
                return Err(e);
            }
        };
        self.handle.process = Some(process);

        match self.wait_until_ready().await {
            Ok(()) => {
                self.handle.state = ServerState::Running;
                info!(
                    "Automation server ready on {} (PID {:?})",
                    self.handle.url,
                    self.handle.pid()
                );
                Ok(&self.handle)
            }
            Err(e) => {
                self.handle.state = ServerState::Failed;
                let diagnosis = self.diagnose(e).await;
                if let Some(mut process) = self.handle.process.take() {
                    if let Err(kill_err) = process.kill().await {
                        warn!("Failed to kill server process: {}", kill_err);
                    }
                }
                Err(diagnosis)
            }
        }
    }

    async fn wait_until_ready(&mut self) -> Result<()> {
        let status_url = self.config.status_url();
        let url = status_url.as_str();
        let probe = &self.probe;
        let Some(process) = self.handle.process.as_mut() else {
            return Err(Error::server("server process was not started"));
        };

        // An exited server ends the wait early; it is reported below.
        PollSpec::new(
            format!("automation server on port {}", self.config.port),
            self.config.start_attempts,
        )
        .interval(self.config.interval)
        .run(|| {
            let exited = process.has_exited();
            async move {
                if exited {
                    return Ok(true);
                }
                probe.is_ready(url).await
            }
        })
        .await?;

        if process.has_exited() {
            return Err(Error::server(format!(
                "server exited during startup; see {}",
                self.handle.log_path.display()
            )));
        }
        Ok(())
    }

    /// Whether any of `pids` is the spawned server or one of its children
    async fn owns_any(&self, pids: &[u32]) -> bool {
        let Some(own) = self.handle.pid() else {
            return false;
        };
        for pid in pids {
            if self.ports.is_descendant_of(*pid, own).await {
                return true;
            }
        }
        false
    }

    /// Work out why startup failed
    async fn diagnose(&self, cause: Error) -> Error {
        let port = self.config.port;

        match self.ports.port_state(port).await {
            Ok(state) if state.occupied && !self.owns_any(&state.pids).await => {
                error!(
                    "Port {} was taken by PIDs {:?} while the server started",
                    port, state.pids
                );
                Error::PortStolen { port }
            }
            Ok(_) => Error::server(format!(
                "{} did not become ready ({}); see {}",
                self.config.base_url(),
                cause,
                self.handle.log_path.display()
            )),
            Err(probe_err) => {
                warn!("Could not re-probe port {}: {}", port, probe_err);
                Error::server(format!(
                    "{}; see {}",
                    cause,
                    self.handle.log_path.display()
                ))
            }
        }
    }

    /// Kill the server and make sure its port is released
    pub async fn stop(&mut self) {
        if let Some(mut process) = self.handle.process.take() {
            if let Err(e) = process.kill().await {
                warn!("Failed to kill server process: {}", e);
            }
        }

        if let Err(e) = self.ports.kill_process_on_port(self.config.port).await {
            warn!("Port {} not released after stop: {}", self.config.port, e);
        }

        self.handle.state = ServerState::Stopped;
        info!("Automation server on port {} stopped", self.config.port);
    }
}
