//! Test doubles: stub executables and an in-memory client.
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! downstream crates that drive clusters without the real database.

use crate::client::{Connection, Dialer, PROBE_QUERY, ServerEndpoint, Transaction};
use crate::provision::Provisioner;
use crate::{Error, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Name of the file stub binaries append their arguments to, in their cwd.
pub const INVOCATION_LOG: &str = "invocations.log";

/// Writes an executable shell script standing in for the database binary.
/// It records its arguments and then sleeps until killed.
#[cfg(unix)]
pub fn write_stub_binary(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    write_script(
        dir,
        name,
        &format!("#!/bin/sh\necho \"$@\" >> {INVOCATION_LOG}\nexec sleep 600\n"),
    )
}

/// Writes an executable that exits immediately with `code`.
#[cfg(unix)]
pub fn write_failing_binary(dir: &Path, name: &str, code: i32) -> std::io::Result<PathBuf> {
    write_script(dir, name, &format!("#!/bin/sh\nexit {code}\n"))
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, body)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Reads the argument lines a stub binary logged in `cwd`.
pub fn invocations(cwd: &Path) -> Vec<String> {
    fs::read_to_string(cwd.join(INVOCATION_LOG))
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Polls [`invocations`] until at least `count` lines were logged or five
/// seconds passed. Stubs log after the spawn returns, so callers that just
/// started a process must wait for the line.
pub async fn wait_for_invocations(cwd: &Path, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lines = invocations(cwd);
        if lines.len() >= count || Instant::now() >= deadline {
            return lines;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Provisioner that installs a stub binary instead of building anything.
#[derive(Debug, Clone)]
pub struct StubProvisioner {
    pub binary_name: String,
    calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl StubProvisioner {
    pub fn new(binary_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            calls: Arc::default(),
        }
    }

    /// `(version, root)` pairs provisioned so far.
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        lock(&self.calls).clone()
    }
}

#[cfg(unix)]
impl Provisioner for StubProvisioner {
    async fn provision(&self, version: &str, root: &Path) -> Result<PathBuf> {
        lock(&self.calls).push((version.to_string(), root.to_path_buf()));
        let bin_dir = root.join("bin");
        write_stub_binary(&bin_dir, &self.binary_name)?;
        Ok(bin_dir)
    }
}

/// Computes a query response from the committed N-Quads.
pub type Responder = dyn Fn(&[String], &str) -> Value + Send + Sync;

/// Shared state behind every connection of a [`FakeDialer`]. Survives
/// across clusters, like a data directory would.
#[derive(Default)]
pub struct FakeStore {
    pub schema: Vec<String>,
    pub committed: Vec<String>,
    pub dials: Vec<ServerEndpoint>,
    pub queries: Vec<(ServerEndpoint, String)>,
    pub discarded: usize,
    /// Probes that fail before the first one succeeds.
    pub probe_failures: usize,
    pub fail_dial: bool,
}

/// In-memory client double.
#[derive(Clone)]
pub struct FakeDialer {
    store: Arc<Mutex<FakeStore>>,
    responder: Arc<Responder>,
}

impl FakeDialer {
    /// A dialer whose queries answer `{"q": []}`.
    pub fn new() -> Self {
        Self::with_responder(|_, _| serde_json::json!({ "q": [] }))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[String], &str) -> Value + Send + Sync + 'static,
    {
        Self {
            store: Arc::default(),
            responder: Arc::new(responder),
        }
    }

    pub fn store(&self) -> MutexGuard<'_, FakeStore> {
        lock(&self.store)
    }
}

impl Default for FakeDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialer for FakeDialer {
    type Conn = FakeConnection;

    fn dial(&self, endpoint: &ServerEndpoint) -> Result<Self::Conn> {
        let mut store = lock(&self.store);
        if store.fail_dial {
            return Err(Error::Dial {
                addr: endpoint.http.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        store.dials.push(*endpoint);

        Ok(FakeConnection {
            endpoint: *endpoint,
            store: Arc::clone(&self.store),
            responder: Arc::clone(&self.responder),
        })
    }
}

pub struct FakeConnection {
    endpoint: ServerEndpoint,
    store: Arc<Mutex<FakeStore>>,
    responder: Arc<Responder>,
}

impl FakeConnection {
    pub fn endpoint(&self) -> ServerEndpoint {
        self.endpoint
    }
}

impl Connection for FakeConnection {
    type Txn = FakeTransaction;

    async fn apply_schema(&self, schema: &str) -> Result<()> {
        lock(&self.store).schema.push(schema.to_string());
        Ok(())
    }

    fn new_transaction(&self) -> Self::Txn {
        FakeTransaction {
            store: Arc::clone(&self.store),
            pending: Vec::new(),
        }
    }

    async fn query(&self, query: &str) -> Result<Vec<u8>> {
        let mut store = lock(&self.store);
        if query == PROBE_QUERY {
            if store.probe_failures > 0 {
                store.probe_failures -= 1;
                return Err(Error::Client("server not ready".to_string()));
            }
            return Ok(b"{}".to_vec());
        }

        store.queries.push((self.endpoint, query.to_string()));
        let response = (self.responder)(&store.committed, query);
        serde_json::to_vec(&response).map_err(|e| Error::Client(e.to_string()))
    }
}

pub struct FakeTransaction {
    store: Arc<Mutex<FakeStore>>,
    pending: Vec<String>,
}

impl Transaction for FakeTransaction {
    async fn mutate(&mut self, nquads: &str, commit_now: bool) -> Result<()> {
        let lines = nquads
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        self.pending.extend(lines);

        if commit_now {
            lock(&self.store).committed.append(&mut self.pending);
        }
        Ok(())
    }

    async fn discard(self) {
        lock(&self.store).discarded += 1;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
