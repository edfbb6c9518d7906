//! Store configuration
//!
//! ```
//! use statewire_runtime::{DeferredPolicy, StoreConfig};
//! use std::time::Duration;
//!
//! let config = StoreConfig::default()
//!     .with_broadcast_capacity(64)
//!     .with_shutdown_timeout(Duration::from_secs(5))
//!     .with_deferred_policy(DeferredPolicy::Correlated);
//! assert_eq!(config.broadcast_capacity, 64);
//! ```

use crate::controller::DeferredPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding [`StoreConfig::broadcast_capacity`]
pub const ENV_BROADCAST_CAPACITY: &str = "STATEWIRE_BROADCAST_CAPACITY";
/// Environment variable overriding [`StoreConfig::shutdown_timeout`], in milliseconds
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "STATEWIRE_SHUTDOWN_TIMEOUT_MS";
/// Environment variable overriding [`StoreConfig::deferred_policy`] (`latest` | `correlated`)
pub const ENV_DEFERRED_POLICY: &str = "STATEWIRE_DEFERRED_POLICY";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable held a value that could not be parsed
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Configuration for a store and the watchers it supervises
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Capacity of the action observer channel
    ///
    /// Slow observers lag and skip actions once this many are buffered.
    pub broadcast_capacity: usize,

    /// How long `shutdown` waits for watchers to drain
    pub shutdown_timeout: Duration,

    /// Policy applied to controllers that did not pick one
    pub deferred_policy: DeferredPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(30),
            deferred_policy: DeferredPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Set the action observer channel capacity.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the shutdown drain timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the default deferred policy.
    #[must_use]
    pub const fn with_deferred_policy(mut self, policy: DeferredPolicy) -> Self {
        self.deferred_policy = policy;
        self
    }

    /// Defaults overridden by `STATEWIRE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a value is unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BROADCAST_CAPACITY) {
            let capacity = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| invalid(ENV_BROADCAST_CAPACITY, &raw, &e.to_string()))?;
            if capacity == 0 {
                return Err(invalid(ENV_BROADCAST_CAPACITY, &raw, "capacity must be positive"));
            }
            config.broadcast_capacity = capacity;
        }

        if let Some(raw) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| invalid(ENV_SHUTDOWN_TIMEOUT_MS, &raw, &e.to_string()))?;
            config.shutdown_timeout = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(ENV_DEFERRED_POLICY) {
            config.deferred_policy = raw
                .parse()
                .map_err(|reason: String| invalid(ENV_DEFERRED_POLICY, &raw, &reason))?;
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
