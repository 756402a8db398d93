//! Upstream SOCKS5 proxy representation.

use crate::dialer::{check_network, Connection, Dialer};
use crate::error::{ConfigError, DialError};
use crate::utils;

use async_trait::async_trait;
use log::debug;
use tokio_socks::tcp::Socks5Stream;

/// One upstream SOCKS5 proxy.
///
/// Every dial opens a fresh TCP connection to the proxy itself and performs
/// an anonymous SOCKS5 handshake; no credentials, no chaining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Host of the proxy.
    host: String,
    /// Port of the proxy.
    port: u16,
}

impl UpstreamTarget {
    /// Create a target from `host:port` or `socks5://host:port`.
    pub fn new(address: &str) -> Result<Self, ConfigError> {
        let (host, port) = utils::parse_proxy_address(address).map_err(|reason| {
            ConfigError::InvalidProxyAddress {
                address: address.to_string(),
                reason,
            }
        })?;
        Ok(Self { host, port })
    }

    /// The proxy address as `host:port`.
    pub fn address(&self) -> String {
        utils::join_host_port(&self.host, self.port)
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socks5://{}", self.address())
    }
}

#[async_trait]
impl Dialer for UpstreamTarget {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        check_network(network)?;
        debug!("Dialing {} through {}", address, self);
        let proxy = self.address();
        let stream = Socks5Stream::connect(proxy.as_str(), address).await?;
        Ok(Box::new(stream))
    }
}
