//! Response envelope of the HTTP API.
//!
//! Every endpoint answers `{"data": ..., "errors": [...], "extensions": {...}}`.
//! A non-empty `errors` array means the request failed even on HTTP 200.

use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<ServerError>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Extensions {
    #[serde(default)]
    txn: Option<TxnContext>,
}

/// Transaction bookkeeping returned by mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TxnContext {
    #[serde(default)]
    pub start_ts: u64,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub data: Value,
    pub txn: Option<TxnContext>,
}

/// Parses a response body, turning reported errors into [`Error::Server`].
pub fn parse(body: &str) -> Result<Response> {
    let envelope: Envelope = serde_json::from_str(body)?;

    if let Some(first) = envelope.errors.into_iter().next() {
        return Err(Error::Server {
            code: first.code,
            message: first.message,
        });
    }

    Ok(Response {
        data: envelope.data,
        txn: envelope.extensions.and_then(|ext| ext.txn),
    })
}
