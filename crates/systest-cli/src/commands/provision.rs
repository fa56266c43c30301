//! Release provisioning.

use super::{release_root, runtime};
use anyhow::{Context, Result};
use std::path::PathBuf;
use systest_cluster::{Provisioner, SourceProvisioner};
use systest_config::HarnessConfig;

/// Builds `version` into `root` (or the user cache) and prints the binary directory.
pub fn run(config: &HarnessConfig, version: &str, root: Option<PathBuf>) -> Result<()> {
    let root = release_root(version, root)?;
    let provisioner =
        SourceProvisioner::new(config.provision.clone(), config.cluster.binary_name.clone());

    println!("Provisioning {version} into {}...", root.display());
    let bin_dir = runtime()?
        .block_on(provisioner.provision(version, &root))
        .with_context(|| format!("Failed to provision {version}"))?;

    println!("Binaries: {}", bin_dir.display());
    Ok(())
}
