//! Error types for cluster management.

use crate::cluster::ClusterState;
use crate::process::Component;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Cluster management errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No free offset found for a base port.
    #[error("No free port offset for base port {base} after {attempts} attempts")]
    PortsExhausted { base: u16, attempts: u32 },

    /// Building a historical release failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The OS refused to start a coordinator or server process.
    #[error("Failed to spawn {component} from {binary}: {source}")]
    Spawn {
        component: Component,
        binary: PathBuf,
        source: std::io::Error,
    },

    /// An additional node could not be started. The offset and directory
    /// it was assigned are kept for inspection.
    #[error("Failed to spawn node (offset {offset}) in {dir}: {source}")]
    NodeSpawn {
        offset: u16,
        dir: PathBuf,
        source: std::io::Error,
    },

    /// A node data directory could not be created.
    #[error("Failed to create node directory {dir}: {source}")]
    NodeDirectory {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// The client could not be dialed against a started server.
    #[error("Failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// A client operation failed.
    #[error("Client error: {0}")]
    Client(String),

    /// A process died before it became ready.
    #[error("{component} exited during startup with status {status}")]
    ProcessExited { component: Component, status: String },

    /// A process did not become ready in time.
    #[error("{component} not ready after {elapsed:?}: {last_error}")]
    ReadinessTimeout {
        component: Component,
        elapsed: Duration,
        last_error: String,
    },

    /// Lifecycle operation attempted from the wrong state.
    #[error("Cannot {operation} a cluster in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ClusterState,
    },
}

/// Failures while fetching and building a historical release.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to fetch {repo}: {reason}")]
    Fetch { repo: String, reason: String },

    #[error("Tag {tag} not found in {repo}")]
    TagNotFound { tag: String, repo: String },

    #[error("Failed to check out {tag}: {reason}")]
    Checkout { tag: String, reason: String },

    #[error("Failed to compile {tag}: {reason}")]
    Compile { tag: String, reason: String },

    #[error("Build of {tag} produced no binary at {path}")]
    BinaryMissing { tag: String, path: PathBuf },

    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
