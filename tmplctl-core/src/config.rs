//! Controller configuration.
//!
//! ```yaml
//! consul:
//!   addr: 127.0.0.1:8500
//! vault:
//!   addr: https://vault.service.consul:8200
//! retry_interval_ms: 5000
//! ```
//!
//! Tokens are accepted on input but never serialized back out and never
//! printed by `Debug`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SECRET_REFRESH_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_BLOCK_WAIT_MS: u64 = 60_000;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Key-value store connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsulConfig {
    pub addr: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl ConsulConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: None,
        }
    }
}

impl fmt::Debug for ConsulConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsulConfig")
            .field("addr", &self.addr)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Secrets service connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub addr: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl VaultConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: None,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything the manager needs to reach the external stores, plus the
/// timing knobs of the watch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub consul: Option<ConsulConfig>,
    pub vault: Option<VaultConfig>,
    /// Delay before retrying after a transient store failure.
    pub retry_interval_ms: u64,
    /// Re-read interval for secrets without a lease.
    pub secret_refresh_interval_ms: u64,
    /// Server-side wait for key-value blocking queries.
    pub block_wait_ms: u64,
    /// Upper bound on how long `stop` waits for background tasks.
    pub stop_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            consul: None,
            vault: None,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            secret_refresh_interval_ms: DEFAULT_SECRET_REFRESH_INTERVAL_MS,
            block_wait_ms: DEFAULT_BLOCK_WAIT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl ControllerConfig {
    pub fn with_consul(mut self, consul: ConsulConfig) -> Self {
        self.consul = Some(consul);
        self
    }

    pub fn with_vault(mut self, vault: VaultConfig) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_secret_refresh_interval(mut self, interval: Duration) -> Self {
        self.secret_refresh_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_block_wait(mut self, wait: Duration) -> Self {
        self.block_wait_ms = duration_ms(wait);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn secret_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.secret_refresh_interval_ms)
    }

    pub fn block_wait(&self) -> Duration {
        Duration::from_millis(self.block_wait_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Load a [`ControllerConfig`] from a YAML file.
pub fn load_at(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
