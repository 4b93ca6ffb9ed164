//! In-process stores with the same blocking semantics as the real services.
//!
//! Used for tests and for embedding the manager without external services.
//! Failures can be queued with `fail_next` to exercise retry paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::consul::{KvBackend, KvEntry};
use crate::error::StoreError;
use crate::vault::{Secret, SecretBackend};

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KvState {
    /// Last assigned modify index. Starts at 1 so an unwritten key reports a
    /// non-zero index and blocking reads on it actually block.
    index: u64,
    entries: HashMap<String, (u64, Option<String>)>,
    failures: VecDeque<StoreError>,
    reads: u64,
}

/// In-memory key-value store with blocking reads.
#[derive(Debug)]
pub struct MemoryKv {
    state: Mutex<KvState>,
    changed: Condvar,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KvState {
                index: 1,
                entries: HashMap::new(),
                failures: VecDeque::new(),
                reads: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `value` under `key`, waking blocked readers.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.update(key, Some(value.into()));
    }

    /// Remove `key`, waking blocked readers.
    pub fn delete(&self, key: &str) {
        self.update(key, None);
    }

    /// Make the next read fail with `err` before touching any key.
    pub fn fail_next(&self, err: StoreError) {
        self.lock().failures.push_back(err);
    }

    /// Number of reads served, including failed ones.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    fn update(&self, key: &str, value: Option<String>) {
        let mut state = self.lock();
        state.index += 1;
        let index = state.index;
        state.entries.insert(key.to_string(), (index, value));
        drop(state);
        self.changed.notify_all();
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str, wait_index: u64, wait: Duration) -> Result<KvEntry, StoreError> {
        let deadline = Instant::now() + wait;
        let mut state = self.lock();
        state.reads += 1;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        loop {
            let (index, value) = state.entries.get(key).cloned().unwrap_or((1, None));
            let now = Instant::now();
            if index > wait_index || now >= deadline {
                return Ok(KvEntry { index, value });
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySecrets
// ---------------------------------------------------------------------------

/// Ttl the secrets service reports for static KV secrets (768h).
const STATIC_TTL: Duration = Duration::from_secs(2_764_800);

#[derive(Debug, Default)]
struct SecretsState {
    secrets: HashMap<String, Secret>,
    denied: HashSet<String>,
    failures: VecDeque<StoreError>,
    revoked: Vec<String>,
    lease_seq: u64,
}

/// In-memory secrets service.
#[derive(Debug, Default)]
pub struct MemorySecrets {
    state: Mutex<SecretsState>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SecretsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an unleased secret. Like a static KV secret it carries a long
    /// ttl hint but no lease id.
    pub fn write<K, V>(&self, path: &str, data: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let secret = Secret {
            lease_duration: STATIC_TTL,
            ..Secret::new(to_map(data))
        };
        self.lock().secrets.insert(path.to_string(), secret);
    }

    /// Store a secret under a fresh lease of `lease_duration`.
    pub fn write_leased<K, V>(
        &self,
        path: &str,
        data: impl IntoIterator<Item = (K, V)>,
        lease_duration: Duration,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.lock();
        state.lease_seq += 1;
        let secret = Secret {
            data: to_map(data),
            lease_id: Some(format!("{path}/{}", state.lease_seq)),
            lease_duration,
            renewable: true,
        };
        state.secrets.insert(path.to_string(), secret);
    }

    /// Reject every read of `path` as a permission error.
    pub fn deny(&self, path: &str) {
        self.lock().denied.insert(path.to_string());
    }

    pub fn fail_next(&self, err: StoreError) {
        self.lock().failures.push_back(err);
    }

    /// Lease ids revoked so far, in order.
    pub fn revoked(&self) -> Vec<String> {
        self.lock().revoked.clone()
    }
}

impl SecretBackend for MemorySecrets {
    fn read(&self, path: &str) -> Result<Option<Secret>, StoreError> {
        let mut state = self.lock();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if state.denied.contains(path) {
            return Err(StoreError::Rejected {
                service: "vault",
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        Ok(state.secrets.get(path).cloned())
    }

    fn revoke(&self, lease_id: &str) -> Result<(), StoreError> {
        self.lock().revoked.push(lease_id.to_string());
        Ok(())
    }
}

fn to_map<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Map<String, Value>
where
    K: Into<String>,
    V: Into<String>,
{
    data.into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect()
}
