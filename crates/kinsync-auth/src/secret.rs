//! Salted secret hashes for account passwords and profile secrets

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// Salted SHA-256 digest of a login secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHash {
    salt: [u8; SALT_LEN],
    digest: [u8; 32],
}

impl SecretHash {
    /// Hash `secret` under a fresh random salt
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt,
            digest: digest(&salt, secret),
        }
    }

    /// Whether `secret` matches
    #[must_use]
    pub fn matches(&self, secret: &str) -> bool {
        let candidate = digest(&self.salt, secret);
        // Fold over every byte so timing does not depend on the first mismatch.
        candidate
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Random temporary secret: `bytes` random bytes, hex encoded
#[must_use]
pub fn temporary_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(1)];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn digest(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_verifies() {
        let hash = SecretHash::derive("hunter22");
        assert!(hash.matches("hunter22"));
        assert!(!hash.matches("hunter23"));
    }

    #[test]
    fn same_secret_gets_distinct_salts() {
        assert_ne!(SecretHash::derive("x"), SecretHash::derive("x"));
    }

    #[test]
    fn temporary_secret_is_hex_of_requested_length() {
        let secret = temporary_secret(4);
        assert_eq!(secret.len(), 8);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
