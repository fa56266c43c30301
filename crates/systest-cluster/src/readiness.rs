//! Waiting for freshly started processes to accept traffic.
//!
//! The default policy polls: a TCP connect for the coordinator, a no-op
//! query for the server, retried with exponential backoff until a deadline.
//! `FixedDelay` sleeps for fixed durations instead and is kept for binaries
//! that cannot be probed. Both fail fast when the process already exited.
//!
//! The coordinator probe only proves the gRPC port accepts connections, not
//! that the coordinator finished leader election. The server probe covers
//! the rest: a server only answers queries once it joined a coordinator
//! with a leader.

use crate::client::Connection;
use crate::process::{Component, ManagedProcess};
use crate::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use systest_config::{ReadinessMode, ReadinessSettings};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How to decide a process is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    Poll {
        timeout: Duration,
        initial_backoff: Duration,
        max_backoff: Duration,
    },
    FixedDelay {
        coordinator: Duration,
        server: Duration,
    },
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessSettings::default())
    }
}

impl From<&ReadinessSettings> for ReadinessPolicy {
    fn from(settings: &ReadinessSettings) -> Self {
        match settings.mode {
            ReadinessMode::Poll => Self::Poll {
                timeout: settings.timeout(),
                initial_backoff: settings.initial_backoff(),
                max_backoff: settings.max_backoff(),
            },
            ReadinessMode::Fixed => Self::FixedDelay {
                coordinator: settings.coordinator_delay(),
                server: settings.server_delay(),
            },
        }
    }
}

impl ReadinessPolicy {
    /// Waits until the coordinator accepts TCP connections on `addr`.
    pub async fn wait_for_coordinator(
        &self,
        process: &mut ManagedProcess,
        addr: SocketAddr,
    ) -> Result<()> {
        match *self {
            Self::FixedDelay { coordinator, .. } => fixed_delay(process, coordinator).await,
            Self::Poll {
                timeout,
                initial_backoff,
                max_backoff,
            } => {
                let backoff = Backoff::new(initial_backoff, max_backoff);
                poll_until(process, timeout, backoff, move || async move {
                    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) => Err(format!("connect {addr}: {e}")),
                        Err(_) => Err(format!("connect {addr}: timed out")),
                    }
                })
                .await
            }
        }
    }

    /// Waits until the server answers a no-op request on `conn`.
    pub async fn wait_for_server<C: Connection>(
        &self,
        process: &mut ManagedProcess,
        conn: &C,
    ) -> Result<()> {
        match *self {
            Self::FixedDelay { server, .. } => fixed_delay(process, server).await,
            Self::Poll {
                timeout,
                initial_backoff,
                max_backoff,
            } => {
                let backoff = Backoff::new(initial_backoff, max_backoff);
                poll_until(process, timeout, backoff, move || async move {
                    conn.probe().await.map_err(|e| e.to_string())
                })
                .await
            }
        }
    }
}

/// Exponential backoff capped at `max`.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max: max.max(initial),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

fn check_exited(process: &mut ManagedProcess) -> Result<()> {
    match process.exit_status() {
        Some(status) => Err(Error::ProcessExited {
            component: process.component(),
            status: status.to_string(),
        }),
        None => Ok(()),
    }
}

async fn fixed_delay(process: &mut ManagedProcess, delay: Duration) -> Result<()> {
    debug!(component = %process.component(), ?delay, "waiting fixed delay");
    sleep(delay).await;
    check_exited(process)
}

async fn poll_until<F, Fut>(
    process: &mut ManagedProcess,
    timeout: Duration,
    mut backoff: Backoff,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), String>>,
{
    let component: Component = process.component();
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        check_exited(process)?;

        attempts += 1;
        let last_error = match probe().await {
            Ok(()) => {
                info!(%component, attempts, elapsed = ?start.elapsed(), "ready");
                return Ok(());
            }
            Err(e) => e,
        };
        debug!(%component, attempts, error = %last_error, "not ready yet");

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::ReadinessTimeout {
                component,
                elapsed,
                last_error,
            });
        }
        sleep(backoff.next_delay().min(timeout - elapsed)).await;
    }
}
