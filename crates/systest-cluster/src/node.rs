//! Additional server processes joined to a running coordinator.

use crate::process::ManagedProcess;
use std::path::{Path, PathBuf};

/// One extra server process added with [`ClusterInstance::add_node`].
///
/// The node belongs to the caller, not to the cluster: closing the cluster
/// does not stop it. Dropping the node kills its process.
///
/// [`ClusterInstance::add_node`]: crate::ClusterInstance::add_node
#[derive(Debug)]
pub struct Node {
    process: ManagedProcess,
    offset: u16,
    dir: PathBuf,
}

impl Node {
    pub(crate) fn new(process: ManagedProcess, offset: u16, dir: PathBuf) -> Self {
        Self {
            process,
            offset,
            dir,
        }
    }

    /// Port offset the node was started with.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Data directory the node runs in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn process(&mut self) -> &mut ManagedProcess {
        &mut self.process
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Kills the node. Never fails.
    pub async fn stop(&mut self) {
        self.process.stop().await;
    }
}
