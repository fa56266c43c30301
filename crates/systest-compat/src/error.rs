//! Error types for the compatibility scenario.

use crate::compare::JsonDiff;
use crate::scenario::Phase;
use std::path::PathBuf;
use thiserror::Error;

/// Compatibility scenario errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Provisioning, starting or talking to a cluster failed.
    #[error(transparent)]
    Cluster(#[from] systest_cluster::Error),

    /// A query returned something other than the expected JSON.
    #[error("{phase}: query {query} returned unexpected results:\n{diff}")]
    Mismatch {
        phase: Phase,
        query: String,
        diff: JsonDiff,
    },

    /// A query returned bytes that are not JSON.
    #[error("{phase}: query {query} returned invalid JSON: {source}")]
    InvalidJson {
        phase: Phase,
        query: String,
        source: serde_json::Error,
    },

    /// A fixture file could not be parsed.
    #[error("Invalid fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the compatibility scenario.
pub type Result<T> = std::result::Result<T, Error>;
