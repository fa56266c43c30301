//! Multi-version cluster management for integration and upgrade tests.
//!
//! Provides local cluster orchestration for test suites:
//! - Port offset allocation shared by every instance in the process
//! - Provisioning of historical releases into private build roots
//! - Process supervision for a coordinator, a server and extra nodes
//! - Readiness checks before handing out a client connection

pub mod client;
pub mod cluster;
pub mod error;
pub mod node;
pub mod ports;
pub mod process;
pub mod provision;
pub mod readiness;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{Connection, Dialer, ServerEndpoint, Transaction};
pub use cluster::{ClusterInstance, ClusterOptions, ClusterState, VersionedCluster};
pub use error::{Error, ProvisionError, Result};
pub use node::Node;
pub use ports::PortAllocator;
pub use process::{Component, ManagedProcess};
pub use provision::{Provisioner, SourceProvisioner};
pub use readiness::ReadinessPolicy;
