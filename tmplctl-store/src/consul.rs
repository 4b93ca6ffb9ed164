//! Key-value store access with blocking queries.
//!
//! A blocking query passes the last seen index; the server holds the request
//! until the key's index moves past it or `wait` elapses, then answers with
//! the current value and index.

use std::time::Duration;

use tmplctl_core::ConsulConfig;

use crate::base_url;
use crate::error::{status_error, transport_error, StoreError};

const SERVICE: &str = "consul";
const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Answer to a blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Index to pass as `wait_index` on the next read.
    pub index: u64,
    /// `None` when the key does not exist.
    pub value: Option<String>,
}

/// Blocking access to a key-value store.
pub trait KvBackend: Send + Sync {
    /// Read `key`, blocking until its index exceeds `wait_index` or `wait`
    /// elapses. A `wait_index` of 0 returns immediately.
    fn get(&self, key: &str, wait_index: u64, wait: Duration) -> Result<KvEntry, StoreError>;
}

/// HTTP client for the Consul KV API.
pub struct ConsulClient {
    agent: ureq::Agent,
    addr: String,
    base: String,
    token: Option<String>,
}

impl ConsulClient {
    /// `block_wait` bounds the server-side wait; the read timeout is padded
    /// past it because the server adds jitter.
    pub fn new(config: &ConsulConfig, block_wait: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(block_wait + block_wait / 16 + Duration::from_secs(5))
            .build();
        Self {
            agent,
            addr: config.addr.clone(),
            base: base_url(&config.addr),
            token: config.token.clone().filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base, key.trim_start_matches('/'))
    }
}

impl KvBackend for ConsulClient {
    fn get(&self, key: &str, wait_index: u64, wait: Duration) -> Result<KvEntry, StoreError> {
        let mut request = self.agent.get(&self.url(key)).query("raw", "");
        if wait_index > 0 {
            request = request
                .query("index", &wait_index.to_string())
                .query("wait", &format!("{}ms", wait.as_millis()));
        }
        if let Some(token) = &self.token {
            request = request.set(TOKEN_HEADER, token);
        }

        match request.call() {
            Ok(response) => {
                let index = parse_index(response.header(INDEX_HEADER))?;
                let value = response.into_string().map_err(|err| StoreError::Decode {
                    service: SERVICE,
                    message: err.to_string(),
                })?;
                tracing::debug!(key, index, "kv read");
                Ok(KvEntry {
                    index,
                    value: Some(value),
                })
            }
            Err(ureq::Error::Status(404, response)) => {
                let index = parse_index(response.header(INDEX_HEADER))?;
                tracing::debug!(key, index, "kv key absent");
                Ok(KvEntry { index, value: None })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(status_error(SERVICE, status, body))
            }
            Err(ureq::Error::Transport(err)) => Err(transport_error(SERVICE, &self.addr, &err)),
        }
    }
}

fn parse_index(header: Option<&str>) -> Result<u64, StoreError> {
    let raw = header.ok_or_else(|| StoreError::Decode {
        service: SERVICE,
        message: format!("missing {INDEX_HEADER} header"),
    })?;
    raw.trim().parse::<u64>().map_err(|err| StoreError::Decode {
        service: SERVICE,
        message: format!("invalid {INDEX_HEADER} {raw:?}: {err}"),
    })
}
