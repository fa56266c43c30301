//! Client over the database's HTTP API.
//!
//! Requests are blocking `ureq` calls moved onto tokio's blocking pool, so
//! the harness never stalls its runtime on a slow server.

use crate::response::{self, Response};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use systest_cluster::{Connection, Dialer, ServerEndpoint, Transaction};
use tracing::{debug, warn};

/// Header asking the server to commit a mutation immediately.
pub const COMMIT_NOW_HEADER: &str = "X-Dgraph-CommitNow";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Dials [`HttpConnection`]s against a server's HTTP port.
#[derive(Debug, Clone, Copy)]
pub struct HttpDialer {
    timeout: Duration,
}

impl HttpDialer {
    /// Creates a dialer whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpDialer {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Dialer for HttpDialer {
    type Conn = HttpConnection;

    fn dial(&self, endpoint: &ServerEndpoint) -> systest_cluster::Result<HttpConnection> {
        debug!(http = %endpoint.http, "dialing");
        Ok(HttpConnection::new(endpoint.http, self.timeout))
    }
}

#[derive(Clone)]
struct Api {
    agent: ureq::Agent,
    base_url: String,
}

impl Api {
    async fn post(
        &self,
        path: String,
        headers: Vec<(&'static str, String)>,
        body: String,
    ) -> Result<Response> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);

        let text = tokio::task::spawn_blocking(move || send(&agent, url, &headers, &body)).await??;
        response::parse(&text)
    }
}

fn send(
    agent: &ureq::Agent,
    url: String,
    headers: &[(&'static str, String)],
    body: &str,
) -> Result<String> {
    let mut request = agent.post(&url);
    for (name, value) in headers {
        request = request.set(name, value);
    }

    match request.send_string(body) {
        Ok(response) => response.into_string().map_err(|e| Error::Transport {
            url,
            reason: e.to_string(),
        }),
        Err(ureq::Error::Status(status, response)) => Err(Error::Http {
            url,
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(other) => Err(Error::Transport {
            url,
            reason: other.to_string(),
        }),
    }
}

/// A connection to one server's HTTP API. Cheap to clone.
#[derive(Clone)]
pub struct HttpConnection {
    api: Api,
    addr: SocketAddr,
}

impl HttpConnection {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build();
        Self {
            api: Api {
                agent,
                base_url: format!("http://{addr}"),
            },
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connection for HttpConnection {
    type Txn = HttpTransaction;

    async fn apply_schema(&self, schema: &str) -> systest_cluster::Result<()> {
        self.api
            .post("/alter".to_string(), Vec::new(), schema.to_string())
            .await?;
        debug!(addr = %self.addr, "schema applied");
        Ok(())
    }

    fn new_transaction(&self) -> HttpTransaction {
        HttpTransaction {
            api: self.api.clone(),
            start_ts: None,
            keys: Vec::new(),
            finished: false,
        }
    }

    async fn query(&self, query: &str) -> systest_cluster::Result<Vec<u8>> {
        let response = self
            .api
            .post("/query".to_string(), Vec::new(), query.to_string())
            .await?;
        let payload = serde_json::to_vec(&response.data).map_err(Error::from)?;
        Ok(payload)
    }
}

/// A write transaction over HTTP.
///
/// The first mutation without `commit_now` opens the transaction on the
/// server; later mutations and the final commit or abort address it by its
/// start timestamp.
pub struct HttpTransaction {
    api: Api,
    start_ts: Option<u64>,
    keys: Vec<String>,
    finished: bool,
}

impl HttpTransaction {
    /// Start timestamp assigned by the server, once a mutation opened it.
    pub fn start_ts(&self) -> Option<u64> {
        self.start_ts
    }

    /// Commits mutations applied without `commit_now`.
    pub async fn commit(mut self) -> systest_cluster::Result<()> {
        self.ensure_open()?;
        self.finished = true;
        let Some(ts) = self.start_ts else {
            return Ok(());
        };

        let keys = serde_json::to_string(&self.keys).map_err(Error::from)?;
        self.api.post(format!("/commit/{ts}"), Vec::new(), keys).await?;
        debug!(start_ts = ts, "transaction committed");
        Ok(())
    }

    fn ensure_open(&self) -> systest_cluster::Result<()> {
        if self.finished {
            return Err(systest_cluster::Error::Client(
                "transaction already finished".to_string(),
            ));
        }
        Ok(())
    }
}

impl Transaction for HttpTransaction {
    async fn mutate(&mut self, nquads: &str, commit_now: bool) -> systest_cluster::Result<()> {
        self.ensure_open()?;

        let path = match self.start_ts {
            Some(ts) => format!("/mutate/{ts}"),
            None => "/mutate".to_string(),
        };
        let mut headers = Vec::new();
        if commit_now {
            headers.push((COMMIT_NOW_HEADER, "true".to_string()));
        }
        let body = format!("{{ set {{\n{nquads}\n}} }}");

        let response = self.api.post(path, headers, body).await?;
        if commit_now {
            self.finished = true;
            return Ok(());
        }
        if let Some(txn) = response.txn {
            self.start_ts.get_or_insert(txn.start_ts);
            self.keys.extend(txn.keys);
        }
        Ok(())
    }

    async fn discard(mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let Some(ts) = self.start_ts else {
            return;
        };

        if let Err(e) = self
            .api
            .post(format!("/abort/{ts}"), Vec::new(), String::new())
            .await
        {
            warn!(start_ts = ts, error = %e, "failed to abort transaction");
        }
    }
}
