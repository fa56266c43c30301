//! Error types for the HTTP client.

use thiserror::Error;

/// HTTP client errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    /// The request never got a response.
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The response body was not the expected JSON.
    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// The server reported errors in a success response.
    #[error("Server error {code}: {message}")]
    Server { code: String, message: String },

    /// The blocking request task panicked or was cancelled.
    #[error("Request task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<Error> for systest_cluster::Error {
    fn from(err: Error) -> Self {
        systest_cluster::Error::Client(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
