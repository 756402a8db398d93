//! Simple example of embedding proxy-ng.
//!
//! Runs the SOCKS5 front-end on 127.0.0.1:9292 with upstream proxies given
//! on the command line, e.g. `cargo run --example simple -- 10.0.0.2:1080 10.0.0.3:1080`.

use proxy_ng::{LoggingDialer, Router, SharedRng, Socks5Server, UpstreamPool};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let upstreams: Vec<String> = std::env::args().skip(1).collect();
    let pool = UpstreamPool::build(upstreams.as_slice())?;
    println!("Loaded {} upstream proxies", pool.len());

    let router = Router::new(Arc::new(pool), SharedRng::from_time());
    let server = Socks5Server::new(Arc::new(LoggingDialer::new(router)));

    println!("Point a SOCKS5 client at 127.0.0.1:9292");
    server.run("127.0.0.1:9292").await?;

    Ok(())
}
