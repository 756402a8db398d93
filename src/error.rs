//! Error types for the proxy-ng crate.

use std::path::PathBuf;
use thiserror::Error;

/// Error returned when the upstream pool has no target to dial through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No upstream proxy available in pool")]
pub struct NoUpstreamAvailable;

/// Error returned when the user-agent pool is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No user agent available in pool")]
pub struct NoUserAgentAvailable;

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} list is empty")]
    EmptyList(&'static str),

    #[error("invalid upstream proxy address {address:?}: {reason}")]
    InvalidProxyAddress { address: String, reason: String },

    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),

    #[error("certificate authority: {0}")]
    Certificate(String),
}

/// Failure of a single outbound dial.
#[derive(Debug, Error)]
pub enum DialError {
    #[error(transparent)]
    NoUpstream(#[from] NoUpstreamAvailable),

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    #[error("upstream proxy: {0}")]
    Upstream(#[from] tokio_socks::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
