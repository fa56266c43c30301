//! Building historical releases into a private root.
//!
//! A provisioned release lives entirely under its build root: the source
//! tree at `<root>/<source_subdir>` and the binary at `<root>/bin`. The
//! variable that points the toolchain at the root is set on each spawned
//! command only, so two releases can be provisioned side by side and the
//! binaries under test are never touched.

use crate::error::ProvisionError;
use crate::Result;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Output;
use systest_config::ProvisionSettings;
use tokio::process::Command;
use tracing::{debug, info};

/// Produces a runnable binary directory for a release tag.
pub trait Provisioner: Send + Sync {
    /// Provisions `version` under `root` and returns the directory holding
    /// its binary. Performs no readiness or correctness checks.
    fn provision(&self, version: &str, root: &Path) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Fetches the source with git and compiles it with the configured build command.
#[derive(Debug, Clone)]
pub struct SourceProvisioner {
    settings: ProvisionSettings,
    binary_name: String,
}

impl SourceProvisioner {
    pub fn new(settings: ProvisionSettings, binary_name: impl Into<String>) -> Self {
        Self {
            settings,
            binary_name: binary_name.into(),
        }
    }

    pub fn source_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.settings.source_subdir)
    }

    pub fn bin_dir(root: &Path) -> PathBuf {
        root.join("bin")
    }

    async fn fetch(&self, root: &Path, source: &Path) -> std::result::Result<(), ProvisionError> {
        let repo = &self.settings.repo_url;
        let output = if source.join(".git").exists() {
            info!(%repo, source = %source.display(), "updating existing source tree");
            self.git(root, source, ["fetch", "--tags", "origin"]).await?
        } else {
            info!(%repo, source = %source.display(), "cloning source tree");
            if let Some(parent) = source.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ProvisionError::Io {
                        program: "mkdir".to_string(),
                        source,
                    })?;
            }
            let source_arg = source.as_os_str();
            self.git(
                root,
                root,
                [OsStr::new("clone"), OsStr::new(repo.as_str()), source_arg],
            )
            .await?
        };

        if !output.status.success() {
            return Err(ProvisionError::Fetch {
                repo: repo.clone(),
                reason: failure_reason(&output),
            });
        }
        Ok(())
    }

    async fn checkout(
        &self,
        version: &str,
        root: &Path,
        source: &Path,
    ) -> std::result::Result<(), ProvisionError> {
        let tag_ref = format!("refs/tags/{version}");
        let output = self
            .git(root, source, ["rev-parse", "--verify", "--quiet", tag_ref.as_str()])
            .await?;
        if !output.status.success() {
            return Err(ProvisionError::TagNotFound {
                tag: version.to_string(),
                repo: self.settings.repo_url.clone(),
            });
        }

        let tag = format!("tags/{version}");
        let output = self
            .git(root, source, ["checkout", tag.as_str(), "-B", version])
            .await?;
        if !output.status.success() {
            return Err(ProvisionError::Checkout {
                tag: version.to_string(),
                reason: failure_reason(&output),
            });
        }
        Ok(())
    }

    async fn compile(
        &self,
        version: &str,
        root: &Path,
        source: &Path,
    ) -> std::result::Result<(), ProvisionError> {
        info!(
            program = %self.settings.build_program,
            args = ?self.settings.build_args,
            "compiling {version}"
        );
        let mut command = self.command(&self.settings.build_program, root, source);
        command.args(&self.settings.build_args);
        for pair in &self.settings.build_env {
            if let Some((name, value)) = pair.split_once('=') {
                command.env(name, value);
            }
        }

        let output = run(&self.settings.build_program, command).await?;
        if !output.status.success() {
            return Err(ProvisionError::Compile {
                tag: version.to_string(),
                reason: failure_reason(&output),
            });
        }
        Ok(())
    }

    async fn git<I, S>(
        &self,
        root: &Path,
        cwd: &Path,
        args: I,
    ) -> std::result::Result<Output, ProvisionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(&self.settings.git_program, root, cwd);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        run(&self.settings.git_program, command).await
    }

    fn command(&self, program: &str, root: &Path, cwd: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .current_dir(cwd)
            .env(&self.settings.root_env, root)
            .kill_on_drop(true);
        command
    }
}

impl Provisioner for SourceProvisioner {
    async fn provision(&self, version: &str, root: &Path) -> Result<PathBuf> {
        let source = self.source_dir(root);
        info!(version, root = %root.display(), "provisioning release");

        self.fetch(root, &source).await?;
        self.checkout(version, root, &source).await?;
        self.compile(version, root, &source).await?;

        let bin_dir = Self::bin_dir(root);
        let binary = bin_dir.join(&self.binary_name);
        if !binary.is_file() {
            return Err(ProvisionError::BinaryMissing {
                tag: version.to_string(),
                path: binary,
            }
            .into());
        }

        info!(version, binary = %binary.display(), "release provisioned");
        Ok(bin_dir)
    }
}

async fn run(program: &str, mut command: Command) -> std::result::Result<Output, ProvisionError> {
    let output = command.output().await.map_err(|source| ProvisionError::Io {
        program: program.to_string(),
        source,
    })?;
    debug!(
        program,
        status = %output.status,
        stdout = %String::from_utf8_lossy(&output.stdout),
        "command finished"
    );
    Ok(output)
}

/// Exit status plus the tail of stderr.
fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    if tail.is_empty() {
        output.status.to_string()
    } else {
        format!("{}: {}", output.status, tail.join(" | "))
    }
}
