//! Configuration Module
//!
//! Handles loading and managing configuration from environment variables.

use std::env;
use std::time::Duration;

/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Keyed-cache TTL in milliseconds; 0 disables batched expiry
    pub cache_ttl_ms: u64,
    /// Activation delay for delayed cells in milliseconds; 0 means next tick
    pub activation_delay_ms: u64,
    /// Number of keys the demo binary requests
    pub demo_keys: usize,
    /// Simulated latency of the demo loader in milliseconds
    pub demo_load_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_MS` - Keyed-cache TTL in milliseconds (default: 0, no expiry)
    /// - `ACTIVATION_DELAY_MS` - Delay before delayed cells may load (default: 0)
    /// - `DEMO_KEYS` - Keys requested by the demo (default: 8)
    /// - `DEMO_LOAD_MS` - Demo loader latency (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl_ms: parse_var("CACHE_TTL_MS").unwrap_or(defaults.cache_ttl_ms),
            activation_delay_ms: parse_var("ACTIVATION_DELAY_MS")
                .unwrap_or(defaults.activation_delay_ms),
            demo_keys: parse_var("DEMO_KEYS").unwrap_or(defaults.demo_keys),
            demo_load_ms: parse_var("DEMO_LOAD_MS").unwrap_or(defaults.demo_load_ms),
        }
    }

    /// The cache TTL, or `None` when expiry is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_ms > 0).then(|| Duration::from_millis(self.cache_ttl_ms))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 0,
            activation_delay_ms: 0,
            demo_keys: 8,
            demo_load_ms: 50,
        }
    }
}
