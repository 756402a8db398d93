//! # proxy-ng
//!
//! A SOCKS5 and HTTP(S) MITM proxy that sends every outbound connection
//! through a randomly chosen upstream SOCKS5 proxy and rewrites the
//! `User-Agent` of every HTTP request with a randomly chosen value.
//!
//! Both front-ends share one [`Router`], which picks an upstream target
//! uniformly at random per dial.

pub mod bootstrap;
pub mod cert;
pub mod cli;
pub mod config;
pub mod dialer;
pub mod error;
pub mod middleware;
pub mod mitm;
pub mod pool;
pub mod proxy;
pub mod socks5;
pub mod user_agent;
mod utils;

pub use cert::CertificateAuthority;
pub use config::{ProxyConfig, ProxyConfigBuilder, ProxyList, UserAgentList};
pub use dialer::{Connection, Dialer};
pub use error::{ConfigError, DialError, NoUpstreamAvailable, NoUserAgentAvailable};
pub use middleware::LoggingDialer;
pub use mitm::HttpProxy;
pub use pool::{Router, UpstreamPool};
pub use proxy::UpstreamTarget;
pub use socks5::Socks5Server;
pub use user_agent::UserAgentPool;
pub use utils::SharedRng;
