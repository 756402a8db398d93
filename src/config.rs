//! Configuration for the proxy and its JSON input files.

use crate::error::ConfigError;
use crate::utils;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default path of the user-agent file.
pub const DEFAULT_USER_AGENT_FILE: &str = "useragents.json";
/// Default path of the upstream proxy file.
pub const DEFAULT_SOCKS_FILE: &str = "socks5-proxies.json";
/// Default local SOCKS5 listener.
pub const DEFAULT_SOCKS_LISTEN: &str = "localhost:9292";
/// Default local HTTP listener.
pub const DEFAULT_HTTP_LISTEN: &str = "localhost:9293";
/// Default path of the MITM CA certificate.
pub const DEFAULT_CA_CERT: &str = "proxy-ng-ca.pem";
/// Default path of the MITM CA private key.
pub const DEFAULT_CA_KEY: &str = "proxy-ng-ca.key";

/// Contents of the user-agent file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentList {
    #[serde(rename = "UserAgents")]
    pub names: Vec<String>,
}

/// Contents of the upstream proxy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyList {
    #[serde(rename = "Proxies")]
    pub names: Vec<String>,
}

impl UserAgentList {
    /// Load and parse a user-agent file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

impl ProxyList {
    /// Load and parse an upstream proxy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration for a proxy-ng process.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// JSON file with the user agents to rotate.
    pub user_agent_file: PathBuf,
    /// JSON file with the upstream SOCKS5 proxies.
    pub socks_file: PathBuf,
    /// Local SOCKS5 listener address.
    pub socks_listen: String,
    /// Local HTTP MITM listener address.
    pub http_listen: String,
    /// Per-connection diagnostic output.
    pub verbose: bool,
    /// PEM certificate of the MITM CA.
    pub ca_cert: PathBuf,
    /// PEM private key of the MITM CA.
    pub ca_key: PathBuf,
}

impl ProxyConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::new()
    }

    /// Check that both listen addresses look like `host:port`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for addr in [&self.socks_listen, &self.http_listen] {
            utils::split_host_port(addr)
                .map_err(|_| ConfigError::InvalidListenAddress(addr.clone()))?;
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfigBuilder::new().build()
    }
}

/// Builder for `ProxyConfig`.
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    user_agent_file: Option<PathBuf>,
    socks_file: Option<PathBuf>,
    socks_listen: Option<String>,
    http_listen: Option<String>,
    verbose: bool,
    ca_cert: Option<PathBuf>,
    ca_key: Option<PathBuf>,
}

impl ProxyConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user-agent file.
    pub fn user_agent_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_agent_file = Some(path.into());
        self
    }

    /// Set the upstream proxy file.
    pub fn socks_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.socks_file = Some(path.into());
        self
    }

    /// Set the local SOCKS5 listener address.
    pub fn socks_listen(mut self, addr: impl Into<String>) -> Self {
        self.socks_listen = Some(addr.into());
        self
    }

    /// Set the local HTTP listener address.
    pub fn http_listen(mut self, addr: impl Into<String>) -> Self {
        self.http_listen = Some(addr.into());
        self
    }

    /// Enable per-connection diagnostic output.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the MITM CA certificate path.
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Set the MITM CA key path.
    pub fn ca_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_key = Some(path.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyConfig {
        ProxyConfig {
            user_agent_file: self
                .user_agent_file
                .unwrap_or_else(|| DEFAULT_USER_AGENT_FILE.into()),
            socks_file: self.socks_file.unwrap_or_else(|| DEFAULT_SOCKS_FILE.into()),
            socks_listen: self
                .socks_listen
                .unwrap_or_else(|| DEFAULT_SOCKS_LISTEN.to_string()),
            http_listen: self
                .http_listen
                .unwrap_or_else(|| DEFAULT_HTTP_LISTEN.to_string()),
            verbose: self.verbose,
            ca_cert: self.ca_cert.unwrap_or_else(|| DEFAULT_CA_CERT.into()),
            ca_key: self.ca_key.unwrap_or_else(|| DEFAULT_CA_KEY.into()),
        }
    }
}
