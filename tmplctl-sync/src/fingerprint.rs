use std::fmt;

use sha2::{Digest, Sha256};

/// SHA-256 of rendered bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(content);
        Fingerprint(hex::encode(h.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
