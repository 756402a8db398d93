//! Utility functions shared by the pools and front-ends.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// A process-wide random source shared by every pool.
///
/// One generator is created at startup and handed to each pool at
/// construction time. The lock is held only for a single draw.
#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    /// Create a generator seeded from the wall clock.
    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::from_seed(seed)
    }

    /// Create a generator with a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Pick an index uniformly in `0..len`, or `None` when `len` is zero.
    pub fn index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.inner.lock().random_range(0..len))
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRng").finish_non_exhaustive()
    }
}

/// Parse an upstream proxy entry into host and port.
///
/// Accepts both the plain `host:port` form used by the proxies file and the
/// `socks5://host:port` URL form.
pub(crate) fn parse_proxy_address(address: &str) -> Result<(String, u16), String> {
    let address = address.trim();
    if !address.contains("://") {
        return split_host_port(address);
    }

    let url = Url::parse(address).map_err(|e| e.to_string())?;
    if url.scheme() != "socks5" {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err("credentials are not supported".to_string());
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "missing host".to_string())?;
    let port = url.port().ok_or_else(|| "missing port".to_string())?;

    Ok((host.trim_start_matches('[').trim_end_matches(']').to_string(), port))
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_host_port(address: &str) -> Result<(String, u16), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| "missing port".to_string())?;

    let host = match host.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?,
        None if host.contains(':') => {
            return Err("IPv6 hosts must be written in brackets".to_string())
        }
        None => host,
    };
    if host.is_empty() {
        return Err("missing host".to_string());
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port {:?}", port))?;

    Ok((host.to_string(), port))
}

/// Join host and port, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}
