//! Configuration management for systest
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the caller)
//! 2. Environment variables (SYSTEST_* prefix, `__` between section and key)
//! 3. systest.local.toml (gitignored, local overrides)
//! 4. systest.toml (git-tracked, project config)
//! 5. ~/.config/systest/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cluster: ClusterSettings,
    pub ports: PortSettings,
    pub readiness: ReadinessSettings,
    pub provision: ProvisionSettings,
    pub compat: CompatSettings,
}

/// How the coordinator and server binaries are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Name of the executable inside a binary directory.
    pub binary_name: String,
    /// Directory holding the current (under test) binary.
    pub bin_dir: PathBuf,
    /// Coordinator write-ahead directory, relative to the instance data dir.
    pub wal_dir: PathBuf,
    pub replicas: u32,
    pub memory_mb: u32,
    /// Value for `--custom_tokenizers`, omitted when unset.
    pub custom_tokenizers: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            binary_name: "dgraph".to_string(),
            bin_dir: PathBuf::from("bin"),
            wal_dir: PathBuf::from("wz"),
            replicas: 3,
            memory_mb: 4096,
            custom_tokenizers: None,
        }
    }
}

/// Well-known base ports and the window offsets are drawn from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub coordinator_grpc: u16,
    pub coordinator_http: u16,
    pub server_grpc: u16,
    pub server_http: u16,
    pub server_internal: u16,
    pub offset_min: u16,
    pub offset_max: u16,
    pub max_attempts: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            coordinator_grpc: 5080,
            coordinator_http: 6080,
            server_grpc: 9080,
            server_http: 8080,
            server_internal: 7080,
            offset_min: 15000,
            offset_max: 45000,
            max_attempts: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessMode {
    /// Probe the processes until they answer or the timeout elapses.
    Poll,
    /// Sleep for fixed durations after each start.
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub mode: ReadinessMode,
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub coordinator_delay_ms: u64,
    pub server_delay_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Poll,
            timeout_ms: 60_000,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            coordinator_delay_ms: 4_000,
            server_delay_ms: 4_000,
        }
    }
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn coordinator_delay(&self) -> Duration {
        Duration::from_millis(self.coordinator_delay_ms)
    }

    pub fn server_delay(&self) -> Duration {
        Duration::from_millis(self.server_delay_ms)
    }
}

/// How a historical release is fetched and compiled.
///
/// `root_env` names the variable that points the build toolchain at the
/// private build root. It is only ever set on the spawned build commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    pub git_program: String,
    pub repo_url: String,
    /// Where the source tree lives, relative to the build root.
    pub source_subdir: PathBuf,
    pub root_env: String,
    pub build_program: String,
    pub build_args: Vec<String>,
    /// Extra `NAME=value` pairs for the build command.
    pub build_env: Vec<String>,
    /// Coordinator gRPC base port of provisioned releases.
    pub coordinator_grpc: u16,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
            repo_url: "https://github.com/dgraph-io/dgraph.git".to_string(),
            source_subdir: PathBuf::from("src/github.com/dgraph-io/dgraph"),
            root_env: "GOPATH".to_string(),
            build_program: "go".to_string(),
            build_args: vec![
                "install".to_string(),
                "github.com/dgraph-io/dgraph/dgraph".to_string(),
            ],
            build_env: vec!["GO111MODULE=off".to_string()],
            coordinator_grpc: 7080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatSettings {
    /// Release tag the data is written with.
    pub from_version: String,
    /// Shared data directory; a temporary one is used when unset.
    pub data_dir: Option<PathBuf>,
    /// Build root for the old release; a temporary one is used when unset.
    pub build_root: Option<PathBuf>,
    /// Keep temporary directories after the run.
    pub keep_dirs: bool,
}

impl Default for CompatSettings {
    fn default() -> Self {
        Self {
            from_version: "v1.0.2".to_string(),
            data_dir: None,
            build_root: None,
            keep_dirs: false,
        }
    }
}

impl HarnessConfig {
    /// Settings for quick local runs against stub binaries.
    pub fn local() -> Self {
        Self {
            readiness: ReadinessSettings {
                mode: ReadinessMode::Fixed,
                coordinator_delay_ms: 50,
                server_delay_ms: 50,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.cluster.bin_dir.is_relative() {
            self.cluster.bin_dir = base.join(&self.cluster.bin_dir);
        }

        for dir in [&mut self.compat.data_dir, &mut self.compat.build_root]
            .into_iter()
            .flatten()
        {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Checks invariants the loaders cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.offset_min >= self.ports.offset_max {
            return Err(ConfigError::ValidationError(format!(
                "ports.offset_min ({}) must be below ports.offset_max ({})",
                self.ports.offset_min, self.ports.offset_max
            )));
        }
        if self.ports.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "ports.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cluster.binary_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster.binary_name must not be empty".to_string(),
            ));
        }
        if self.readiness.initial_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "readiness.initial_backoff_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.cluster.binary_name, "dgraph");
        assert_eq!(config.cluster.replicas, 3);
        assert_eq!(config.cluster.memory_mb, 4096);
        assert_eq!(config.ports.server_grpc, 9080);
        assert_eq!(config.ports.coordinator_http, 6080);
        assert_eq!(config.readiness.mode, ReadinessMode::Poll);
        assert_eq!(config.provision.root_env, "GOPATH");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_config() {
        let config = HarnessConfig::local();
        assert_eq!(config.readiness.mode, ReadinessMode::Fixed);
        assert_eq!(config.readiness.server_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = HarnessConfig::default();
        config.compat.data_dir = Some(PathBuf::from("data"));
        config.resolve_paths("/home/user/project");

        assert_eq!(config.cluster.bin_dir, PathBuf::from("/home/user/project/bin"));
        assert_eq!(
            config.compat.data_dir,
            Some(PathBuf::from("/home/user/project/data"))
        );
        assert_eq!(config.compat.build_root, None);
    }

    #[test]
    fn test_validate_rejects_empty_offset_window() {
        let mut config = HarnessConfig::default();
        config.ports.offset_min = 500;
        config.ports.offset_max = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
