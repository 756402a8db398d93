//! The dial capability shared by upstream targets, the router and its decorators.

use crate::error::DialError;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream returned by a dial.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// An established outbound connection.
pub type Connection = Box<dyn Stream>;

/// Something that can open an outbound connection to `address`.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection over `network` (`tcp`, `tcp4` or `tcp6`) to `address` (`host:port`).
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        (**self).dial(network, address).await
    }
}

/// Reject networks other than TCP.
pub(crate) fn check_network(network: &str) -> Result<(), DialError> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(()),
        other => Err(DialError::UnsupportedNetwork(other.to_string())),
    }
}
