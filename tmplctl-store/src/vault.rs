//! Secrets service access.
//!
//! The secrets service has no blocking queries; callers re-read a secret
//! when its lease is two-thirds through, or on a fixed interval when the
//! secret carries no lease.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use tmplctl_core::VaultConfig;

use crate::base_url;
use crate::error::{status_error, transport_error, StoreError};

const SERVICE: &str = "vault";
const TOKEN_HEADER: &str = "X-Vault-Token";

/// A secret read from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    pub data: Map<String, Value>,
    pub lease_id: Option<String>,
    /// Zero when the secret is not leased. Static secrets report a duration
    /// without a lease id; it is only a cache hint.
    pub lease_duration: Duration,
    pub renewable: bool,
}

impl Secret {
    /// An unleased secret holding `data`.
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            lease_id: None,
            lease_duration: Duration::ZERO,
            renewable: false,
        }
    }

    /// When to read the secret again. Only leased secrets follow their lease.
    pub fn refresh_after(&self, fallback: Duration) -> Duration {
        match self.lease_id {
            Some(_) if !self.lease_duration.is_zero() => self.lease_duration * 2 / 3,
            _ => fallback,
        }
    }
}

/// Blocking access to a secrets service.
pub trait SecretBackend: Send + Sync {
    /// Read the secret at `path`. `Ok(None)` when nothing is stored there.
    fn read(&self, path: &str) -> Result<Option<Secret>, StoreError>;

    /// Give back a lease obtained through [`SecretBackend::read`].
    fn revoke(&self, lease_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// HTTP client for the Vault logical API.
pub struct VaultClient {
    agent: ureq::Agent,
    addr: String,
    base: String,
    token: String,
}

impl VaultClient {
    pub fn new(config: &VaultConfig, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self {
            agent,
            addr: config.addr.clone(),
            base: base_url(&config.addr),
            token: token.into(),
        }
    }

    fn call(&self, request: ureq::Request) -> Result<Option<ureq::Response>, StoreError> {
        match request.set(TOKEN_HEADER, &self.token).call() {
            Ok(response) => Ok(Some(response)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(status_error(SERVICE, status, body))
            }
            Err(ureq::Error::Transport(err)) => Err(transport_error(SERVICE, &self.addr, &err)),
        }
    }
}

impl SecretBackend for VaultClient {
    fn read(&self, path: &str) -> Result<Option<Secret>, StoreError> {
        let url = format!("{}/v1/{}", self.base, path.trim_start_matches('/'));
        let Some(response) = self.call(self.agent.get(&url))? else {
            tracing::debug!(path, "secret absent");
            return Ok(None);
        };
        let body: ReadResponse = response.into_json().map_err(|err| StoreError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })?;
        Ok(Some(secret_from_response(body)))
    }

    fn revoke(&self, lease_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/v1/sys/leases/revoke", self.base);
        let request = self.agent.put(&url).set(TOKEN_HEADER, &self.token);
        match request.send_json(json!({ "lease_id": lease_id })) {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(status_error(SERVICE, status, body))
            }
            Err(ureq::Error::Transport(err)) => Err(transport_error(SERVICE, &self.addr, &err)),
        }
    }
}

fn secret_from_response(body: ReadResponse) -> Secret {
    Secret {
        data: unwrap_versioned(body.data.unwrap_or_default()),
        lease_id: Some(body.lease_id).filter(|id| !id.is_empty()),
        lease_duration: Duration::from_secs(body.lease_duration),
        renewable: body.renewable,
    }
}

/// Versioned KV mounts nest the payload as `data.data` next to
/// `data.metadata`; flatten it so templates read fields the same way on
/// either mount type.
fn unwrap_versioned(data: Map<String, Value>) -> Map<String, Value> {
    match (data.get("data"), data.get("metadata")) {
        (Some(Value::Object(inner)), Some(Value::Object(_))) => inner.clone(),
        _ => data,
    }
}
