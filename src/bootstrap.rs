//! Process startup: load configuration, build the pools, run both front-ends.

use crate::cert::CertificateAuthority;
use crate::config::{ProxyConfig, ProxyList, UserAgentList};
use crate::dialer::Dialer;
use crate::error::ConfigError;
use crate::middleware::LoggingDialer;
use crate::mitm::HttpProxy;
use crate::pool::{Router, UpstreamPool};
use crate::socks5::Socks5Server;
use crate::user_agent::UserAgentPool;
use crate::utils::SharedRng;

use anyhow::Context;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Load both JSON files and build the upstream and user-agent pools.
///
/// Both pools draw from the same random source.
pub fn load_pools(
    config: &ProxyConfig,
    rng: SharedRng,
) -> Result<(UpstreamPool, UserAgentPool), ConfigError> {
    let user_agents = UserAgentList::load(&config.user_agent_file)?;
    let proxies = ProxyList::load(&config.socks_file)?;

    if config.verbose {
        for proxy in &proxies.names {
            info!("Loading {}", proxy);
        }
    }
    let pool = UpstreamPool::build(proxies.names.as_slice())?;
    if config.verbose {
        info!("Loading complete");
    }

    let user_agents = UserAgentPool::new(user_agents.names, rng)?;
    Ok((pool, user_agents))
}

/// Build the dialer shared by both front-ends.
///
/// With `verbose` the router is wrapped in a [`LoggingDialer`].
pub fn build_dialer(pool: UpstreamPool, rng: SharedRng, verbose: bool) -> Arc<dyn Dialer> {
    let router = Router::new(Arc::new(pool), rng);
    if verbose {
        Arc::new(LoggingDialer::new(router))
    } else {
        Arc::new(router)
    }
}

/// Run the proxy until interrupted or until either listener fails.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    config.validate()?;

    let rng = SharedRng::from_time();
    let (pool, user_agents) = load_pools(&config, rng.clone())?;
    info!(
        "Loaded {} upstream proxies and {} user agents",
        pool.len(),
        user_agents.names().len()
    );

    let dialer = build_dialer(pool, rng, config.verbose);
    let ca = CertificateAuthority::load_or_generate(&config.ca_cert, &config.ca_key)?;

    let socks_listener = TcpListener::bind(&config.socks_listen)
        .await
        .with_context(|| format!("failed to bind SOCKS5 listener on {}", config.socks_listen))?;
    if config.verbose {
        info!("Started socks listener on {}", config.socks_listen);
    }

    let http_listener = TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_listen))?;
    if config.verbose {
        info!("Started http listener on {}", config.http_listen);
    }

    let socks = Socks5Server::new(dialer.clone());
    let http = HttpProxy::new(dialer, Arc::new(user_agents), Arc::new(ca))?;

    info!("Ready");

    tokio::select! {
        result = socks.serve(socks_listener) => result.context("SOCKS5 listener failed"),
        result = http.serve(http_listener) => result.context("HTTP listener failed"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt")?;
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
