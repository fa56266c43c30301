//! Cluster handles: one coordinator plus one server, with a client attached.

use crate::client::{Dialer, ServerEndpoint};
use crate::node::Node;
use crate::ports::PortAllocator;
use crate::process::{self, Component, ManagedProcess};
use crate::provision::Provisioner;
use crate::readiness::ReadinessPolicy;
use crate::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use systest_config::HarnessConfig;
use tracing::info;

/// Lifecycle of a [`ClusterInstance`].
///
/// `Unstarted → CoordinatorRunning → Ready → Closed`; `close` is valid from
/// every state and an instance is never started again once closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Unstarted,
    CoordinatorRunning,
    Ready,
    Closed,
}

/// Everything needed to launch one cluster instance.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub binary_name: String,
    pub bin_dir: PathBuf,
    pub wal_dir: PathBuf,
    pub replicas: u32,
    pub memory_mb: u32,
    pub custom_tokenizers: Option<String>,
    pub coordinator_base: u16,
    pub coordinator_http_base: u16,
    pub server_grpc_base: u16,
    pub server_http_base: u16,
    pub server_internal_base: u16,
    pub readiness: ReadinessPolicy,
}

impl ClusterOptions {
    /// Options for the binaries under test.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            binary_name: config.cluster.binary_name.clone(),
            bin_dir: config.cluster.bin_dir.clone(),
            wal_dir: config.cluster.wal_dir.clone(),
            replicas: config.cluster.replicas,
            memory_mb: config.cluster.memory_mb,
            custom_tokenizers: config.cluster.custom_tokenizers.clone(),
            coordinator_base: config.ports.coordinator_grpc,
            coordinator_http_base: config.ports.coordinator_http,
            server_grpc_base: config.ports.server_grpc,
            server_http_base: config.ports.server_http,
            server_internal_base: config.ports.server_internal,
            readiness: ReadinessPolicy::from(&config.readiness),
        }
    }

    /// Options for a provisioned release. The binary directory is filled in
    /// by provisioning.
    pub fn for_release(config: &HarnessConfig) -> Self {
        Self {
            coordinator_base: config.provision.coordinator_grpc,
            ..Self::from_config(config)
        }
    }

    pub fn binary(&self) -> PathBuf {
        self.bin_dir.join(&self.binary_name)
    }

    fn coordinator_companions(&self) -> [u16; 1] {
        [self.coordinator_http_base]
    }

    fn server_companions(&self) -> [u16; 2] {
        [self.server_http_base, self.server_internal_base]
    }
}

/// One running deployment: a coordinator, a server and a client.
pub struct ClusterInstance<D: Dialer> {
    options: ClusterOptions,
    dir: PathBuf,
    allocator: Arc<PortAllocator>,
    dialer: D,
    coordinator_offset: u16,
    server_offset: u16,
    coordinator: Option<ManagedProcess>,
    server: Option<ManagedProcess>,
    client: Option<D::Conn>,
    state: ClusterState,
}

impl<D: Dialer> ClusterInstance<D> {
    /// Allocates ports for a new instance working in `dir`. Starts nothing.
    pub fn new(
        options: ClusterOptions,
        dir: impl Into<PathBuf>,
        dialer: D,
        allocator: Arc<PortAllocator>,
    ) -> Result<Self> {
        let coordinator_offset = allocator.allocate_offset_with(
            options.coordinator_base,
            &options.coordinator_companions(),
        )?;
        let server_offset = allocator
            .allocate_offset_with(options.server_grpc_base, &options.server_companions())?;

        Ok(Self {
            options,
            dir: dir.into(),
            allocator,
            dialer,
            coordinator_offset,
            server_offset,
            coordinator: None,
            server: None,
            client: None,
            state: ClusterState::Unstarted,
        })
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.options.bin_dir
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn coordinator_offset(&self) -> u16 {
        self.coordinator_offset
    }

    pub fn server_offset(&self) -> u16 {
        self.server_offset
    }

    pub fn coordinator_port(&self) -> u16 {
        self.options.coordinator_base + self.coordinator_offset
    }

    pub fn server_port(&self) -> u16 {
        self.options.server_grpc_base + self.server_offset
    }

    pub fn coordinator_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.coordinator_port()))
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.server_port()))
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            grpc: self.server_addr(),
            http: SocketAddr::from((
                Ipv4Addr::LOCALHOST,
                self.options.server_http_base + self.server_offset,
            )),
        }
    }

    /// The client connection, present once [`start`](Self::start) succeeded.
    pub fn client(&self) -> Option<&D::Conn> {
        self.client.as_ref()
    }

    /// Starts the coordinator and waits until it is ready.
    pub async fn start_coordinator_only(&mut self) -> Result<()> {
        self.expect_state("start", ClusterState::Unstarted)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let port = self.coordinator_port();
        let addr = self.coordinator_addr();
        let command = process::coordinator_command(
            &self.options.binary(),
            &self.dir,
            &self.options.wal_dir,
            self.coordinator_offset,
            self.options.replicas,
        );
        let coordinator = self
            .coordinator
            .insert(ManagedProcess::spawn(Component::Coordinator, command)?);
        self.state = ClusterState::CoordinatorRunning;
        info!(dir = %self.dir.display(), port, "coordinator started");

        self.options
            .readiness
            .wait_for_coordinator(coordinator, addr)
            .await
    }

    /// Starts the coordinator and the server, dials the client and waits
    /// until the server answers it.
    pub async fn start(&mut self) -> Result<()> {
        self.start_coordinator_only().await?;

        let command = process::server_command(
            &self.options.binary(),
            &self.dir,
            self.coordinator_port(),
            self.server_offset,
            self.options.memory_mb,
            self.options.custom_tokenizers.as_deref(),
        );
        let endpoint = self.endpoint();
        let server = self
            .server
            .insert(ManagedProcess::spawn(Component::Server, command)?);

        let client = self.dialer.dial(&endpoint)?;
        self.options.readiness.wait_for_server(server, &client).await?;

        self.client = Some(client);
        self.state = ClusterState::Ready;
        info!(grpc = %endpoint.grpc, http = %endpoint.http, "cluster ready");
        Ok(())
    }

    /// Starts one more server in `dir`, joined to this coordinator.
    pub async fn add_node(&mut self, dir: impl AsRef<Path>) -> Result<Node> {
        if !matches!(
            self.state,
            ClusterState::CoordinatorRunning | ClusterState::Ready
        ) {
            return Err(Error::InvalidState {
                operation: "add a node to",
                state: self.state,
            });
        }

        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::NodeDirectory {
                dir: dir.clone(),
                source,
            })?;

        // Nodes share the server namespace so no two server-like processes
        // ever get the same offset.
        let offset = self.allocator.allocate_offset_with(
            self.options.server_grpc_base,
            &self.options.server_companions(),
        )?;
        let command = process::server_command(
            &self.options.binary(),
            &dir,
            self.coordinator_port(),
            offset,
            self.options.memory_mb,
            self.options.custom_tokenizers.as_deref(),
        );

        match ManagedProcess::spawn(Component::Node, command) {
            Ok(process) => {
                info!(offset, dir = %dir.display(), "node started");
                Ok(Node::new(process, offset, dir))
            }
            Err(Error::Spawn { source, .. }) => Err(Error::NodeSpawn {
                offset,
                dir,
                source,
            }),
            Err(e) => Err(e),
        }
    }

    /// Dials a fresh client against this instance and replaces the old one.
    pub fn redial(&mut self) -> Result<&D::Conn> {
        self.expect_state("redial", ClusterState::Ready)?;
        let client = self.dialer.dial(&self.endpoint())?;
        Ok(self.client.insert(client))
    }

    /// Kills the server and the coordinator. Never fails, safe to repeat.
    pub async fn close(&mut self) {
        if self.state == ClusterState::Closed {
            return;
        }

        self.client = None;
        if let Some(server) = self.server.as_mut() {
            server.stop().await;
        }
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.stop().await;
        }

        info!(dir = %self.dir.display(), from = ?self.state, "cluster closed");
        self.state = ClusterState::Closed;
    }

    fn expect_state(&self, operation: &'static str, expected: ClusterState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

/// A cluster running a historical release built into a private root.
pub struct VersionedCluster<D: Dialer> {
    version: String,
    build_root: PathBuf,
    cluster: ClusterInstance<D>,
}

impl<D: Dialer> VersionedCluster<D> {
    /// Provisions `version` under `build_root`, then allocates ports for an
    /// instance working in `dir` that runs the provisioned binary.
    pub async fn provision<P: Provisioner>(
        provisioner: &P,
        version: impl Into<String>,
        build_root: impl Into<PathBuf>,
        mut options: ClusterOptions,
        dir: impl Into<PathBuf>,
        dialer: D,
        allocator: Arc<PortAllocator>,
    ) -> Result<Self> {
        let version = version.into();
        let build_root = build_root.into();

        options.bin_dir = provisioner.provision(&version, &build_root).await?;
        let cluster = ClusterInstance::new(options, dir, dialer, allocator)?;

        Ok(Self {
            version,
            build_root,
            cluster,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn into_inner(self) -> ClusterInstance<D> {
        self.cluster
    }
}

impl<D: Dialer> Deref for VersionedCluster<D> {
    type Target = ClusterInstance<D>;

    fn deref(&self) -> &Self::Target {
        &self.cluster
    }
}

impl<D: Dialer> DerefMut for VersionedCluster<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.cluster
    }
}
