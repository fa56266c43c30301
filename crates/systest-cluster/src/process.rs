//! Coordinator and server process management.

use crate::{Error, Result};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Upper bound on reaping a killed process.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Role of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Coordinator,
    Server,
    Node,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Coordinator => "coordinator",
            Component::Server => "server",
            Component::Node => "node",
        };
        f.write_str(name)
    }
}

/// Builds the coordinator invocation:
/// `<binary> zero -w=<wal_dir> -o <offset> --replicas <n>`, run in `data_dir`.
pub fn coordinator_command(
    binary: &Path,
    data_dir: &Path,
    wal_dir: &Path,
    offset: u16,
    replicas: u32,
) -> Command {
    let mut command = Command::new(binary);
    command
        .arg("zero")
        .arg(format!("-w={}", wal_dir.display()))
        .arg("-o")
        .arg(offset.to_string())
        .arg("--replicas")
        .arg(replicas.to_string())
        .current_dir(data_dir);
    command
}

/// Builds a server invocation joined to the coordinator on `coordinator_port`.
pub fn server_command(
    binary: &Path,
    data_dir: &Path,
    coordinator_port: u16,
    offset: u16,
    memory_mb: u32,
    custom_tokenizers: Option<&str>,
) -> Command {
    let mut command = Command::new(binary);
    command
        .arg("server")
        .arg(format!("--memory_mb={memory_mb}"))
        .arg("--zero")
        .arg(format!(":{coordinator_port}"))
        .arg("--port_offset")
        .arg(offset.to_string())
        .current_dir(data_dir);
    if let Some(tokenizers) = custom_tokenizers {
        command.arg("--custom_tokenizers").arg(tokenizers);
    }
    command
}

/// A spawned child process.
///
/// The child is killed when this value is dropped, so every exit path of
/// the owning scope releases it. [`ManagedProcess::stop`] kills and reaps
/// it explicitly and never fails.
#[derive(Debug)]
pub struct ManagedProcess {
    component: Component,
    binary: PathBuf,
    child: Child,
    stopped: bool,
}

impl ManagedProcess {
    /// Spawns `command` with inherited stdout/stderr.
    ///
    /// Returns as soon as the OS accepted the spawn.
    pub fn spawn(component: Component, mut command: Command) -> Result<Self> {
        let binary = PathBuf::from(command.as_std().get_program());
        let args: Vec<&OsStr> = command.as_std().get_args().collect();
        debug!(%component, binary = %binary.display(), ?args, "spawning");

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                component,
                binary: binary.clone(),
                source,
            })?;

        info!(%component, pid = child.id(), "process started");

        Ok(Self {
            component,
            binary,
            child,
            stopped: false,
        })
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// OS process id, `None` once reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the process has already exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Checks if the process is still running.
    pub fn is_alive(&mut self) -> bool {
        !self.stopped && matches!(self.child.try_wait(), Ok(None))
    }

    /// Kills the process and waits for it to exit.
    ///
    /// Failures are logged and swallowed; calling this twice is a no-op.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(component = %self.component, %status, "process already exited");
            return;
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.kill()).await {
            Ok(Ok(())) => info!(component = %self.component, "process stopped"),
            Ok(Err(e)) => warn!(component = %self.component, error = %e, "failed to kill process"),
            Err(_) => warn!(
                component = %self.component,
                "process did not exit within {STOP_TIMEOUT:?} after kill"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_coordinator_command() {
        let command = coordinator_command(
            Path::new("/opt/bin/dgraph"),
            Path::new("/data"),
            Path::new("wz"),
            15123,
            3,
        );

        assert_eq!(command.as_std().get_program(), "/opt/bin/dgraph");
        assert_eq!(
            args(&command),
            ["zero", "-w=wz", "-o", "15123", "--replicas", "3"]
        );
        assert_eq!(command.as_std().get_current_dir(), Some(Path::new("/data")));
    }

    #[test]
    fn test_server_command() {
        let command = server_command(
            Path::new("/opt/bin/dgraph"),
            Path::new("/data"),
            20203,
            15001,
            4096,
            None,
        );

        assert_eq!(
            args(&command),
            [
                "server",
                "--memory_mb=4096",
                "--zero",
                ":20203",
                "--port_offset",
                "15001"
            ]
        );
    }

    #[test]
    fn test_server_command_with_tokenizers() {
        let command = server_command(
            Path::new("dgraph"),
            Path::new("/data"),
            5080,
            0,
            4096,
            Some("a.so,b.so"),
        );

        let args = args(&command);
        assert_eq!(&args[args.len() - 2..], ["--custom_tokenizers", "a.so,b.so"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_stop() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut process = ManagedProcess::spawn(Component::Server, command).unwrap();

        assert!(process.is_alive());
        assert!(process.id().is_some());

        process.stop().await;
        assert!(!process.is_alive());

        // Second stop is a no-op
        process.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let command = Command::new("/nonexistent/systest/dgraph");
        let err = ManagedProcess::spawn(Component::Coordinator, command).unwrap_err();

        match err {
            Error::Spawn {
                component, binary, ..
            } => {
                assert_eq!(component, Component::Coordinator);
                assert_eq!(binary, PathBuf::from("/nonexistent/systest/dgraph"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_after_exit() {
        let command = Command::new("true");
        let mut process = ManagedProcess::spawn(Component::Node, command).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(process.exit_status().is_some());
        process.stop().await;
    }
}
