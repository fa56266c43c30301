//! CLI command implementations.

pub mod cluster;
pub mod compat;
pub mod config;
pub mod provision;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use systest_config::{ConfigLoader, HarnessConfig, Paths};
use tokio::runtime::Runtime;

/// Loads the layered configuration for `project`, plus `extra` if given.
pub fn load_config(project: &Path, extra: Option<&Path>) -> Result<HarnessConfig> {
    let mut loader = ConfigLoader::new().with_project_dir(project);
    if let Some(file) = extra {
        loader = loader.with_file(file);
    }
    loader.load().context("Failed to load configuration")
}

/// Runtime for commands that supervise processes.
pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// `root` if given, otherwise the user cache entry for `version`.
pub fn release_root(version: &str, root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => Paths::new()
            .release_cache_dir(version)
            .context("No build root given and no user cache directory available"),
    }
}
