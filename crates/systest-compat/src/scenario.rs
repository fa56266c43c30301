//! The upgrade compatibility scenario.
//!
//! 1. Provision the old release and start it on a fresh data directory.
//! 2. Apply the fixture schema and write the fixture with commit-now.
//! 3. Run every check against the old release.
//! 4. Close the old cluster, keeping the data directory.
//! 5. Start the current binaries on the same directory.
//! 6. Run every check again through the new cluster's own connection.
//!
//! Every result is compared with the fixture's expectation in the fixture's
//! mode. After the upgrade each result must also equal the result the old
//! release returned for the same check, array order included. Any mismatch
//! fails the run. Both clusters are closed on every path.

use crate::compare::{CompareMode, JsonDiff, compare_json};
use crate::fixture::{CompatibilityFixture, QueryCheck};
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use systest_cluster::{
    ClusterInstance, ClusterOptions, Connection, Dialer, PortAllocator, Provisioner, Transaction,
    VersionedCluster,
};
use systest_config::{CompatSettings, HarnessConfig};
use tempfile::TempDir;
use tracing::{info, warn};

/// Which side of the upgrade a check ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeUpgrade,
    AfterUpgrade,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Phase::BeforeUpgrade => "before upgrade",
            Phase::AfterUpgrade => "after upgrade",
        })
    }
}

/// A check that passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub phase: Phase,
    pub name: String,
    pub elapsed: Duration,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub from_version: String,
    pub data_dir: PathBuf,
    pub checks: Vec<CheckOutcome>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn checks_in(&self, phase: Phase) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(move |c| c.phase == phase)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Compatibility {} -> current: {} checks passed in {:.1?}",
            self.from_version,
            self.checks.len(),
            self.elapsed
        )?;
        for check in &self.checks {
            writeln!(
                f,
                "  {:<16} {} ({:.1?})",
                check.phase,
                check.name,
                check.elapsed
            )?;
        }
        Ok(())
    }
}

/// Writes data with an old release and reads it back with the current one.
pub struct CompatibilityScenario<D, P> {
    config: HarnessConfig,
    fixture: CompatibilityFixture,
    dialer: D,
    provisioner: P,
    allocator: Arc<PortAllocator>,
}

impl<D, P> CompatibilityScenario<D, P>
where
    D: Dialer + Clone,
    P: Provisioner,
{
    /// A scenario with the standard fixture and an allocator drawing from
    /// the configured offset window.
    pub fn new(config: HarnessConfig, dialer: D, provisioner: P) -> Self {
        let allocator = Arc::new(PortAllocator::from_settings(&config.ports));
        Self {
            config,
            fixture: CompatibilityFixture::standard(),
            dialer,
            provisioner,
            allocator,
        }
    }

    pub fn with_fixture(mut self, fixture: CompatibilityFixture) -> Self {
        self.fixture = fixture;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<PortAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn fixture(&self) -> &CompatibilityFixture {
        &self.fixture
    }

    /// Runs the scenario end to end.
    pub async fn run(&self) -> Result<ScenarioReport> {
        let started = Instant::now();
        let compat = &self.config.compat;
        let dirs = ScratchDirs::prepare(compat)?;
        info!(
            from_version = %compat.from_version,
            data_dir = %dirs.data_dir.display(),
            build_root = %dirs.build_root.display(),
            "starting compatibility scenario"
        );

        let mut old = VersionedCluster::provision(
            &self.provisioner,
            compat.from_version.clone(),
            dirs.build_root.clone(),
            ClusterOptions::for_release(&self.config),
            dirs.data_dir.clone(),
            self.dialer.clone(),
            Arc::clone(&self.allocator),
        )
        .await?;
        let mut current = ClusterInstance::new(
            ClusterOptions::from_config(&self.config),
            dirs.data_dir.clone(),
            self.dialer.clone(),
            Arc::clone(&self.allocator),
        )?;

        let mut checks = Vec::new();
        let outcome = self.drive(&mut old, &mut current, &mut checks).await;
        old.close().await;
        current.close().await;

        let report = ScenarioReport {
            from_version: compat.from_version.clone(),
            data_dir: dirs.data_dir.clone(),
            checks,
            elapsed: started.elapsed(),
        };
        dirs.finish(compat.keep_dirs);

        outcome?;
        info!(checks = report.checks.len(), elapsed = ?report.elapsed, "compatibility scenario passed");
        Ok(report)
    }

    async fn drive(
        &self,
        old: &mut ClusterInstance<D>,
        current: &mut ClusterInstance<D>,
        checks: &mut Vec<CheckOutcome>,
    ) -> Result<()> {
        old.start().await?;
        let client = connected(old)?;
        client.apply_schema(&self.fixture.schema).await?;

        let mut txn = client.new_transaction();
        let written = txn.mutate(&self.fixture.nquads, true).await;
        txn.discard().await;
        written?;
        info!(
            statements = self.fixture.statements().count(),
            "fixture written"
        );

        let baseline = self
            .run_checks(Phase::BeforeUpgrade, client, None, checks)
            .await?;

        old.close().await;
        current.start().await?;
        let client = connected(current)?;
        self.run_checks(Phase::AfterUpgrade, client, Some(&baseline), checks)
            .await?;
        Ok(())
    }

    /// Runs every check and returns the results in check order. Results
    /// must also match `baseline` exactly when one is given.
    async fn run_checks(
        &self,
        phase: Phase,
        client: &D::Conn,
        baseline: Option<&[Value]>,
        checks: &mut Vec<CheckOutcome>,
    ) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(self.fixture.checks.len());
        for (i, check) in self.fixture.checks.iter().enumerate() {
            let started = Instant::now();
            let bytes = client.query(&check.query).await?;
            let actual: Value =
                serde_json::from_slice(&bytes).map_err(|source| Error::InvalidJson {
                    phase,
                    query: check.name.clone(),
                    source,
                })?;

            let diff = compare_json(&check.expected, &actual, self.fixture.mode);
            if !diff.is_empty() {
                warn!(%phase, check = %check.name, differences = diff.len(), "check failed");
                return Err(mismatch(phase, check, diff));
            }

            if let Some(before) = baseline.and_then(|results| results.get(i)) {
                let drift = compare_json(before, &actual, CompareMode::Exact);
                if !drift.is_empty() {
                    warn!(
                        %phase,
                        check = %check.name,
                        differences = drift.len(),
                        "result changed across the upgrade"
                    );
                    return Err(mismatch(phase, check, drift));
                }
            }

            info!(%phase, check = %check.name, "check passed");
            checks.push(CheckOutcome {
                phase,
                name: check.name.clone(),
                elapsed: started.elapsed(),
            });
            results.push(actual);
        }
        Ok(results)
    }
}

fn mismatch(phase: Phase, check: &QueryCheck, diff: JsonDiff) -> Error {
    Error::Mismatch {
        phase,
        query: check.name.clone(),
        diff,
    }
}

fn connected<D: Dialer>(cluster: &ClusterInstance<D>) -> Result<&D::Conn> {
    cluster.client().ok_or_else(|| {
        Error::Cluster(systest_cluster::Error::InvalidState {
            operation: "query",
            state: cluster.state(),
        })
    })
}

/// Data directory and build root, temporary unless configured.
struct ScratchDirs {
    data_dir: PathBuf,
    build_root: PathBuf,
    temps: Vec<TempDir>,
}

impl ScratchDirs {
    fn prepare(settings: &CompatSettings) -> Result<Self> {
        let mut temps = Vec::new();
        let data_dir =
            configured_or_temp(settings.data_dir.as_deref(), "systest-data-", &mut temps)?;
        let build_root =
            configured_or_temp(settings.build_root.as_deref(), "systest-build-", &mut temps)?;
        Ok(Self {
            data_dir,
            build_root,
            temps,
        })
    }

    fn finish(self, keep: bool) {
        if !keep {
            return;
        }
        for dir in self.temps {
            let path = dir.keep();
            info!(path = %path.display(), "kept scratch directory");
        }
    }
}

fn configured_or_temp(
    configured: Option<&Path>,
    prefix: &str,
    temps: &mut Vec<TempDir>,
) -> Result<PathBuf> {
    if let Some(dir) = configured {
        std::fs::create_dir_all(dir)?;
        return Ok(dir.to_path_buf());
    }
    let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
    let path = dir.path().to_path_buf();
    temps.push(dir);
    Ok(path)
}
