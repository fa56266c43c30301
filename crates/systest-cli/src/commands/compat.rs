//! Compatibility scenario.

use super::runtime;
use anyhow::{Context, Result};
use std::path::PathBuf;
use systest_client::HttpDialer;
use systest_cluster::SourceProvisioner;
use systest_compat::{CompatibilityFixture, CompatibilityScenario};
use systest_config::HarnessConfig;

/// Command-line settings layered over the loaded configuration.
pub struct Overrides {
    pub from_version: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub build_root: Option<PathBuf>,
    pub keep_dirs: bool,
    pub fixture: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut HarnessConfig) -> Option<PathBuf> {
        if let Some(version) = self.from_version {
            config.compat.from_version = version;
        }
        if self.data_dir.is_some() {
            config.compat.data_dir = self.data_dir;
        }
        if self.build_root.is_some() {
            config.compat.build_root = self.build_root;
        }
        config.compat.keep_dirs |= self.keep_dirs;
        self.fixture
    }
}

/// Runs the scenario with the HTTP client and source builds.
pub fn run(mut config: HarnessConfig, overrides: Overrides) -> Result<()> {
    let fixture = match overrides.apply(&mut config) {
        Some(path) => CompatibilityFixture::from_file(&path)
            .with_context(|| format!("Failed to load fixture {}", path.display()))?,
        None => CompatibilityFixture::standard(),
    };

    let provisioner =
        SourceProvisioner::new(config.provision.clone(), config.cluster.binary_name.clone());
    let from_version = config.compat.from_version.clone();
    let scenario = CompatibilityScenario::new(config, HttpDialer::default(), provisioner)
        .with_fixture(fixture);

    let report = runtime()?
        .block_on(scenario.run())
        .with_context(|| format!("Compatibility check from {from_version} failed"))?;

    print!("{report}");
    Ok(())
}
