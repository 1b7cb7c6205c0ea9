//! External command execution
//!
//! Every command the rig runs goes through a [`ProcessExecutor`], so tests can
//! substitute a scripted executor for the real one.
//!
//! Two command modes are supported:
//! - [`CommandSpec::Shell`] - interpreted by `sh -c` / `cmd /C`, so pipes and
//!   redirects work. Used for most device-management commands.
//! - [`CommandSpec::Argv`] - program plus argument vector, no shell expansion.
//!   Used where arguments may contain spaces or quotes (simulator names).

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use rig_core::prelude::*;
use rig_core::CommandResult;

/// A command to run, either through the shell or as a direct argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Shell(String),
    Argv { program: String, args: Vec<String> },
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }

    pub fn argv<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the tokio command for this spec
    fn to_command(&self) -> Command {
        match self {
            CommandSpec::Shell(line) => {
                #[cfg(windows)]
                {
                    let mut cmd = Command::new("cmd");
                    cmd.arg("/C").arg(line);
                    cmd
                }
                #[cfg(not(windows))]
                {
                    let mut cmd = Command::new("sh");
                    cmd.arg("-c").arg(line);
                    cmd
                }
            }
            CommandSpec::Argv { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(line) => f.write_str(line),
            CommandSpec::Argv { program, args } => {
                f.write_str(&quote_arg(program))?;
                for arg in args {
                    write!(f, " {}", quote_arg(arg))?;
                }
                Ok(())
            }
        }
    }
}

/// Quote an argument for display or shell use if it contains whitespace or quotes
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// A long-running process to start in the background
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub command: CommandSpec,
    /// File receiving both stdout and stderr; discarded when `None`
    pub log_file: Option<PathBuf>,
    /// Kill the process when its handle is dropped
    pub kill_on_drop: bool,
}

impl SpawnSpec {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            log_file: None,
            kill_on_drop: false,
        }
    }

    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }
}

/// Handle to a background process started by [`ProcessExecutor::spawn`]
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    child: Option<Child>,
    exited: bool,
}

impl ProcessHandle {
    pub fn from_child(child: Child, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pid: child.id(),
            child: Some(child),
            exited: false,
        }
    }

    /// A handle with no OS child attached (used by fake executors)
    pub fn untracked(pid: Option<u32>, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pid,
            child: None,
            exited: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check without blocking whether the process has exited
    pub fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("`{}` exited with {}", self.label, status);
                    self.exited = true;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to query status of `{}`: {}", self.label, e);
                    self.exited = true;
                }
            }
        }
        self.exited
    }

    /// Force-kill the process and reap it
    pub async fn kill(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            if !self.exited {
                info!("Killing `{}` (PID {:?})", self.label, self.pid);
                child.kill().await?;
            }
        }
        self.exited = true;
        Ok(())
    }
}

/// Runs external commands
///
/// `run` never fails because a command exited non-zero; callers interpret the
/// exit code and output. It fails only when the process could not be started
/// or awaited.
#[trait_variant::make(ProcessExecutor: Send)]
pub trait LocalProcessExecutor {
    /// Run a command to completion, capturing stdout, stderr and exit code
    async fn run(&self, command: &CommandSpec) -> Result<CommandResult>;

    /// Start a long-running background process
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle>;
}

/// Executor backed by real OS processes
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    timeout: Option<Duration>,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl ProcessExecutor for SystemExecutor {
    async fn run(&self, command: &CommandSpec) -> Result<CommandResult> {
        let cmdline = command.to_string();
        trace!("exec: {}", cmdline);

        let mut child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process_spawn(&cmdline, e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Both pipes are drained concurrently before waiting, otherwise a child
        // that fills one pipe buffer blocks forever.
        let completion = async {
            let (out, err) = tokio::join!(read_stream(stdout), read_stream(stderr));
            let status = child.wait().await?;
            Ok::<_, Error>(CommandResult {
                stdout: out?,
                stderr: err?,
                exit_code: status.code(),
            })
        };

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, completion)
                .await
                .map_err(|_| Error::process(format!("`{}` timed out after {:?}", cmdline, limit)))??,
            None => completion.await?,
        };

        trace!(
            "exit {:?} from `{}` (stdout {} bytes, stderr {} bytes)",
            result.exit_code,
            cmdline,
            result.stdout.len(),
            result.stderr.len()
        );
        Ok(result)
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        let cmdline = spec.command.to_string();
        let mut cmd = spec.command.to_command();
        cmd.stdin(Stdio::null()).kill_on_drop(spec.kill_on_drop);

        match &spec.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let out = std::fs::File::create(path)?;
                let err = out.try_clone()?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::process_spawn(&cmdline, e.to_string()))?;

        info!("Started `{}` with PID {:?}", cmdline, child.id());
        Ok(ProcessHandle::from_child(child, cmdline))
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
