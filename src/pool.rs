//! Core upstream pool and random router.

use crate::dialer::{Connection, Dialer};
use crate::error::{ConfigError, DialError, NoUpstreamAvailable};
use crate::proxy::UpstreamTarget;
use crate::utils::SharedRng;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

/// An immutable, ordered list of upstream dial targets.
#[derive(Debug, Clone)]
pub struct UpstreamPool<D = UpstreamTarget> {
    targets: Vec<D>,
}

impl UpstreamPool<UpstreamTarget> {
    /// Build a pool from upstream proxy addresses.
    ///
    /// Any address that fails to parse aborts construction, as does an
    /// empty list.
    pub fn build<S: AsRef<str>>(addresses: &[S]) -> Result<Self, ConfigError> {
        info!("Building upstream pool from {} addresses", addresses.len());

        let targets = addresses
            .iter()
            .map(|address| UpstreamTarget::new(address.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(targets)
    }
}

impl<D> UpstreamPool<D> {
    /// Create a pool from ready-made targets. The list must not be empty.
    pub fn new(targets: Vec<D>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::EmptyList("upstream proxy"));
        }
        Ok(Self { targets })
    }

    /// Create a pool without the emptiness check.
    pub fn unchecked(targets: Vec<D>) -> Self {
        Self { targets }
    }

    /// All targets in configuration order.
    pub fn targets(&self) -> &[D] {
        &self.targets
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the pool has no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Picks one upstream target uniformly at random for every dial.
///
/// Cloning is cheap; clones share the pool and the random source.
#[derive(Debug, Clone)]
pub struct Router<D = UpstreamTarget> {
    /// The shared pool.
    pool: Arc<UpstreamPool<D>>,
    /// Used for random target selection.
    rng: SharedRng,
}

impl<D> Router<D> {
    /// Create a router over `pool`.
    pub fn new(pool: Arc<UpstreamPool<D>>, rng: SharedRng) -> Self {
        Self { pool, rng }
    }

    /// Select a target uniformly at random.
    pub fn select(&self) -> Result<&D, NoUpstreamAvailable> {
        let idx = self.rng.index(self.pool.len()).ok_or(NoUpstreamAvailable)?;
        Ok(&self.pool.targets[idx])
    }
}

#[async_trait]
impl<D: Dialer> Dialer for Router<D> {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        let target = self.select()?;
        target.dial(network, address).await
    }
}
