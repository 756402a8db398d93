//! User-agent rotation.

use crate::error::{ConfigError, NoUserAgentAvailable};
use crate::utils::SharedRng;

/// An immutable list of user-agent strings sampled uniformly at random.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    names: Vec<String>,
    rng: SharedRng,
}

impl UserAgentPool {
    /// Create a pool. The list must not be empty.
    pub fn new(names: Vec<String>, rng: SharedRng) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::EmptyList("user agent"));
        }
        Ok(Self { names, rng })
    }

    /// Create a pool without the emptiness check.
    pub fn unchecked(names: Vec<String>, rng: SharedRng) -> Self {
        Self { names, rng }
    }

    /// All user agents in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pick a user agent uniformly at random.
    pub fn random_name(&self) -> Result<&str, NoUserAgentAvailable> {
        let idx = self.rng.index(self.names.len()).ok_or(NoUserAgentAvailable)?;
        Ok(&self.names[idx])
    }
}
