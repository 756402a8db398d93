//! Command line flags.

use crate::config::{
    ProxyConfig, DEFAULT_CA_CERT, DEFAULT_CA_KEY, DEFAULT_HTTP_LISTEN, DEFAULT_SOCKS_FILE,
    DEFAULT_SOCKS_LISTEN, DEFAULT_USER_AGENT_FILE,
};

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Rotating SOCKS5 and HTTP MITM proxy.
#[derive(Parser, Debug)]
#[command(name = "proxy-ng", disable_version_flag = true)]
pub struct Cli {
    /// Json file that contains useragents to use
    #[arg(long = "uaFile", default_value = DEFAULT_USER_AGENT_FILE)]
    pub ua_file: PathBuf,

    /// Socks file that contains socks proxies to use
    #[arg(long = "socksFile", default_value = DEFAULT_SOCKS_FILE)]
    pub socks_file: PathBuf,

    /// Local socks listener to accept connections
    #[arg(long = "socks", default_value = DEFAULT_SOCKS_LISTEN)]
    pub socks: String,

    /// HTTP listener to accept connections, this changes the useragent on each request
    #[arg(long = "http", default_value = DEFAULT_HTTP_LISTEN)]
    pub http: String,

    /// PEM certificate of the MITM CA, generated when missing
    #[arg(long = "caCert", default_value = DEFAULT_CA_CERT)]
    pub ca_cert: PathBuf,

    /// PEM private key of the MITM CA, generated when missing
    #[arg(long = "caKey", default_value = DEFAULT_CA_KEY)]
    pub ca_key: PathBuf,

    /// Verbose output from proxy
    #[arg(long)]
    pub verbose: bool,

    /// Current Version
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    /// Parse the process arguments, accepting single-dash long flags.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Convert the flags into a proxy configuration.
    pub fn into_config(self) -> ProxyConfig {
        ProxyConfig::builder()
            .user_agent_file(self.ua_file)
            .socks_file(self.socks_file)
            .socks_listen(self.socks)
            .http_listen(self.http)
            .ca_cert(self.ca_cert)
            .ca_key(self.ca_key)
            .verbose(self.verbose)
            .build()
    }
}

/// The line printed for `-version`.
pub fn version_string() -> String {
    format!(
        "proxy-ng v{} {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("PROXY_NG_GIT_COMMIT").unwrap_or("unknown")
    )
}

/// Rewrite `-flag` to `--flag` so both spellings parse.
///
/// Single-letter flags and everything after a bare `--` are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || passthrough {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            if s == "--" {
                passthrough = true;
                return arg;
            }
            let is_long_single_dash = s.starts_with('-')
                && !s.starts_with("--")
                && s.len() > 2
                && s[1..].starts_with(|c: char| c.is_ascii_alphabetic());
            if is_long_single_dash {
                OsString::from(format!("-{}", s))
            } else {
                arg
            }
        })
        .collect()
}
