//! Client capability surface consumed by the harness.
//!
//! The harness never speaks the database protocol itself. It dials a
//! connection once the server is up and hands it to test code, which uses
//! the operations below. Implementations live outside this crate.

use crate::Result;
use std::future::Future;
use std::net::SocketAddr;

/// Opens connections to a running server.
pub trait Dialer: Send + Sync {
    type Conn: Connection;

    /// Opens a connection. Must not block on the server being ready.
    fn dial(&self, endpoint: &ServerEndpoint) -> Result<Self::Conn>;
}

/// Client-facing addresses of one server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    pub grpc: SocketAddr,
    pub http: SocketAddr,
}

/// An open connection to one server.
pub trait Connection: Send + Sync {
    type Txn: Transaction;

    /// Applies a schema definition.
    fn apply_schema(&self, schema: &str) -> impl Future<Output = Result<()>> + Send;

    fn new_transaction(&self) -> Self::Txn;

    /// Runs a read query and returns the JSON payload of its result.
    fn query(&self, query: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Cheapest request that proves the server accepts client traffic.
    fn probe(&self) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.query(PROBE_QUERY).await?;
            Ok(())
        }
    }
}

/// A write transaction.
pub trait Transaction: Send {
    /// Applies N-Quad statements, committing right away when `commit_now`.
    fn mutate(
        &mut self,
        nquads: &str,
        commit_now: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Aborts the transaction if it is still open.
    fn discard(self) -> impl Future<Output = ()> + Send;
}

/// Query used by the default [`Connection::probe`].
pub const PROBE_QUERY: &str = "schema {}";
