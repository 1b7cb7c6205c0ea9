//! mobile-rig - Mobile UI test environment bring-up
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result};

use rig_core::prelude::{error, info};
use rig_core::Platform;
use rig_device::{DaemonHealthMonitor, PortManager, SystemExecutor, ToolAvailability};
use rig_session::{
    apply_env_overrides, init_config_dir, load_settings, load_settings_file, HttpStatusProbe, Rig,
    Settings, WebDriverSessionFactory,
};

/// mobile-rig - Bring up emulators, simulators and the automation server for UI tests
#[derive(Parser, Debug)]
#[command(name = "rig")]
#[command(about = "Mobile UI test environment bring-up", long_about = None)]
struct Args {
    /// Project directory holding .rig/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which external tools are available
    Doctor,
    /// Create .rig/config.toml with defaults
    Init,
    /// Bring the full environment up and create a session
    Up {
        /// Config file to use instead of .rig/config.toml
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Keep the environment up until Ctrl+C
        #[arg(long)]
        keep: bool,
    },
    /// Inspect or free a TCP port
    Port {
        port: u16,
        /// Kill whatever listens on the port
        #[arg(long)]
        free: bool,
    },
    /// Inspect the adb daemon
    Adb {
        /// Restart the daemon if it is unhealthy
        #[arg(long)]
        ensure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    rig_core::logging::init(true)?;

    let args = Args::parse();
    let project = args
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let result = match args.command {
        Command::Doctor => doctor(&project),
        Command::Init => {
            init_config_dir(&project)?;
            println!("Created {}", rig_session::config::config_path(&project).display());
            Ok(())
        }
        Command::Up { config, keep } => up(&project, config.as_deref(), keep).await,
        Command::Port { port, free } => port_command(port, free).await,
        Command::Adb { ensure } => adb_command(ensure).await,
    };

    if let Err(ref e) = result {
        error!("rig failed: {:?}", e);
    }
    result
}

fn settings_for(project: &Path, config: Option<&Path>) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => load_settings_file(path)?,
        None => load_settings(project)?,
    };
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

fn doctor(project: &Path) -> Result<()> {
    let tools = ToolAvailability::check();
    let show = |name: &str, path: Option<&str>| match path {
        Some(path) => println!("  ✅ {:<14} {}", name, path),
        None => println!("  ❌ {:<14} not found", name),
    };

    println!("Tools:");
    show("adb", tools.adb_path.as_deref());
    show("emulator", tools.emulator_path.as_deref());
    show("xcrun simctl", tools.xcrun_simctl.then_some("available"));
    show("appium", tools.appium_path.as_deref());

    let settings = settings_for(project, None)?;
    let config = settings.resolve()?;
    println!();
    println!(
        "Environment: {} {} '{}' ({}), app {}",
        config.platform, config.device_kind, config.device_name, config.environment, config.app_id
    );
    println!("Server: {}", config.server_url());

    let missing = match config.platform {
        Platform::Android => tools.android_unavailable_message(),
        Platform::IOS => tools.ios_unavailable_message(),
    };
    if let Some(hint) = missing {
        bail!("{} tooling incomplete: {}", config.platform, hint);
    }
    if tools.appium_path.is_none() && settings.server.binary.is_none() {
        bail!("appium not found on PATH; install it or set [server] binary");
    }
    Ok(())
}

async fn up(project: &Path, config: Option<&Path>, keep: bool) -> Result<()> {
    let settings = settings_for(project, config)?;
    let mut rig = Rig::from_settings(
        &settings,
        Arc::new(SystemExecutor::new()),
        ToolAvailability::check(),
        HttpStatusProbe::new()?,
        WebDriverSessionFactory::new()?,
    )?;

    let ctx = rig.setup().await?;
    println!("Device:  {} ({})", ctx.device.display_name, ctx.device.label());
    println!("Server:  {}", ctx.server_url);
    println!("Session: {}", ctx.handle.session_id);
    println!("{}", serde_json::to_string_pretty(&ctx.capabilities)?);

    if keep {
        info!("Environment up; waiting for Ctrl+C");
        println!("Press Ctrl+C to tear down");
        tokio::signal::ctrl_c().await?;
    }

    rig.teardown(ctx).await?;
    Ok(())
}

async fn port_command(port: u16, free: bool) -> Result<()> {
    let settings = Settings::default();
    let ports = PortManager::new(Arc::new(SystemExecutor::new()), &settings.polling);

    let state = ports.port_state(port).await?;
    if !state.occupied {
        println!("Port {} is free", port);
        return Ok(());
    }
    println!("Port {} is held by PIDs {:?}", port, state.pids);

    if free {
        ports.kill_process_on_port(port).await?;
        println!("Port {} released", port);
    }
    Ok(())
}

async fn adb_command(ensure: bool) -> Result<()> {
    let settings = Settings::default();
    let monitor = DaemonHealthMonitor::new(
        Arc::new(SystemExecutor::new()),
        ToolAvailability::check(),
        settings.polling,
    );

    let health = if ensure {
        monitor.ensure_healthy().await?
    } else {
        monitor.classify_devices().await?
    };

    if health.devices.is_empty() {
        println!("No devices attached");
    }
    for device in &health.devices {
        println!("{:<24} {}", device.serial, device.status);
    }
    println!(
        "Daemon {}",
        if health.is_healthy() { "healthy" } else { "unhealthy" }
    );
    Ok(())
}
