//! # tmplctl-store
//!
//! Blocking clients for the key-value store and the secrets service.
//!
//! Both are reached through traits ([`KvBackend`], [`SecretBackend`]) so the
//! watch session can run against the real services ([`ConsulClient`],
//! [`VaultClient`]) or against in-process stores ([`MemoryKv`],
//! [`MemorySecrets`]). Every call blocks the calling thread; callers on an
//! async runtime go through `spawn_blocking`.

pub mod consul;
pub mod error;
pub mod memory;
pub mod vault;

pub use consul::{ConsulClient, KvBackend, KvEntry};
pub use error::StoreError;
pub use memory::{MemoryKv, MemorySecrets};
pub use vault::{Secret, SecretBackend, VaultClient};

/// Normalise a service address into a base URL without trailing slash.
///
/// `127.0.0.1:8500` becomes `http://127.0.0.1:8500`.
pub(crate) fn base_url(addr: &str) -> String {
    let trimmed = addr.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
