//! Local cluster commands.

use super::{release_root, runtime};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use systest_client::HttpDialer;
use systest_cluster::{
    ClusterInstance, ClusterOptions, PortAllocator, SourceProvisioner, VersionedCluster,
};
use systest_config::HarnessConfig;

/// Starts a cluster in `data_dir` and holds it until Ctrl+C.
pub fn up(
    config: &HarnessConfig,
    data_dir: PathBuf,
    version: Option<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    runtime()?.block_on(serve(config, data_dir, version, root))
}

async fn serve(
    config: &HarnessConfig,
    data_dir: PathBuf,
    version: Option<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    let allocator = Arc::new(PortAllocator::from_settings(&config.ports));
    let mut cluster = match version {
        Some(version) => {
            let root = release_root(&version, root)?;
            let provisioner = SourceProvisioner::new(
                config.provision.clone(),
                config.cluster.binary_name.clone(),
            );
            VersionedCluster::provision(
                &provisioner,
                version.as_str(),
                root,
                ClusterOptions::for_release(config),
                data_dir,
                HttpDialer::default(),
                allocator,
            )
            .await
            .with_context(|| format!("Failed to provision {version}"))?
            .into_inner()
        }
        None => ClusterInstance::new(
            ClusterOptions::from_config(config),
            data_dir,
            HttpDialer::default(),
            allocator,
        )?,
    };

    let started = cluster.start().await;
    if let Err(e) = started {
        cluster.close().await;
        return Err(e).context("Failed to start cluster");
    }

    let endpoint = cluster.endpoint();
    println!("Cluster running in {}", cluster.dir().display());
    println!("  Coordinator: {}", cluster.coordinator_addr());
    println!("  gRPC:        {}", endpoint.grpc);
    println!("  HTTP:        {}", endpoint.http);
    println!();
    println!("Press Ctrl+C to stop.");

    let waited = tokio::signal::ctrl_c().await;
    cluster.close().await;
    waited.context("Failed to listen for Ctrl+C")?;
    println!("Cluster stopped.");
    Ok(())
}
