//! Salted one-way hashing of vehicle identifiers

use crate::domain::error::ConfigError;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default salt length when none is configured
pub const SALT_LEN: usize = 10;

/// Deterministic for a fixed salt; collision probability is governed by
/// `digest_size` (bytes of SHA-256 output kept, hex-encoded).
#[derive(Debug, Clone)]
pub struct Anonymizer {
    salt: Vec<u8>,
    digest_size: usize,
}

impl Anonymizer {
    pub fn new(salt: Vec<u8>, digest_size: usize) -> Result<Self, ConfigError> {
        if !(1..=32).contains(&digest_size) {
            return Err(ConfigError::DigestSize(digest_size));
        }
        Ok(Self { salt, digest_size })
    }

    /// Anonymizer with a fresh random salt; hashes are not reproducible across runs
    pub fn with_random_salt(digest_size: usize) -> Result<Self, ConfigError> {
        let mut salt = vec![0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        Self::new(salt, digest_size)
    }

    pub fn hash(&self, id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(id.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..self.digest_size])
    }
}
