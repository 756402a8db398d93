//! Dial middleware.

use crate::dialer::{Connection, Dialer};
use crate::error::DialError;

use async_trait::async_trait;
use log::{info, warn};

/// Wraps a dialer and logs every outbound connection it opens.
///
/// Enabled with `-verbose`; the wrapped dialer is left untouched.
#[derive(Debug, Clone)]
pub struct LoggingDialer<D> {
    inner: D,
}

impl<D> LoggingDialer<D> {
    /// Wrap `inner`.
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// The wrapped dialer.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D: Dialer> Dialer for LoggingDialer<D> {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        match self.inner.dial(network, address).await {
            Ok(conn) => {
                info!("Connecting to {} ({})", address, network);
                Ok(conn)
            }
            Err(e) => {
                warn!("Failed to connect to {} ({}): {}", address, network, e);
                Err(e)
            }
        }
    }
}
