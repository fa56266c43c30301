//! HTTP client for the graph database under test.
//!
//! Implements the harness client surface ([`Dialer`], [`Connection`],
//! [`Transaction`]) over the server's HTTP API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | schema    | `POST /alter` |
//! | mutate    | `POST /mutate[/<start_ts>]`, commit-now via header |
//! | commit    | `POST /commit/<start_ts>` with the touched keys |
//! | discard   | `POST /abort/<start_ts>` |
//! | query     | `POST /query` |
//!
//! [`Dialer`]: systest_cluster::Dialer
//! [`Connection`]: systest_cluster::Connection
//! [`Transaction`]: systest_cluster::Transaction

pub mod error;
pub mod http;
pub mod response;

pub use error::{Error, Result};
pub use http::{COMMIT_NOW_HEADER, HttpConnection, HttpDialer, HttpTransaction};
pub use response::{Response, TxnContext};
