//! Runtime configuration

use crate::error::ConfigError;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synchronization core configuration
///
/// Every field has a default, so a TOML file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Credential lifetime in seconds
    pub credential_ttl_secs: u64,
    /// Timeout for one bootstrap fetch in milliseconds
    pub bootstrap_timeout_ms: u64,
    /// First reconnect delay in milliseconds
    pub reconnect_backoff_ms: u64,
    /// Cap for the doubling reconnect delay in milliseconds
    pub max_reconnect_backoff_ms: u64,
    /// Longest accepted note, in characters
    pub max_note_len: usize,
    /// Random bytes in a reset profile secret (hex doubles the length)
    pub temporary_secret_bytes: usize,
    /// 32-byte hex seed for the signing key; random per process when absent
    pub signing_seed_hex: Option<String>,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML, filling absent fields with defaults
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, `Invalid` on out-of-range values
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot run with
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credential_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "credential_ttl_secs",
                reason: "must be positive",
            });
        }
        if chrono::Duration::from_std(self.credential_ttl()).is_err() {
            return Err(ConfigError::Invalid {
                field: "credential_ttl_secs",
                reason: "exceeds the representable time range",
            });
        }
        if self.bootstrap_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "bootstrap_timeout_ms",
                reason: "must be positive",
            });
        }
        if self.max_reconnect_backoff_ms < self.reconnect_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "max_reconnect_backoff_ms",
                reason: "must not be below reconnect_backoff_ms",
            });
        }
        if self.max_note_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_note_len",
                reason: "must be positive",
            });
        }
        if self.temporary_secret_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "temporary_secret_bytes",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// With credential lifetime
    #[inline]
    #[must_use]
    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl_secs = ttl.as_secs().max(1);
        self
    }

    /// With bootstrap timeout
    #[inline]
    #[must_use]
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout_ms = millis(timeout);
        self
    }

    /// With reconnect backoff bounds
    #[inline]
    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_backoff_ms = millis(initial);
        self.max_reconnect_backoff_ms = millis(max).max(self.reconnect_backoff_ms);
        self
    }

    /// With note length limit
    #[inline]
    #[must_use]
    pub fn with_max_note_len(mut self, max: usize) -> Self {
        self.max_note_len = max;
        self
    }

    /// With a fixed signing seed
    #[inline]
    #[must_use]
    pub fn with_signing_seed(mut self, seed: [u8; 32]) -> Self {
        self.signing_seed_hex = Some(hex::encode(seed));
        self
    }

    /// Credential lifetime
    #[inline]
    #[must_use]
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }

    /// Bootstrap fetch timeout
    #[inline]
    #[must_use]
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    /// Reconnect delay after `attempt` consecutive failures, doubling up to the cap
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .reconnect_backoff_ms
            .saturating_mul(factor)
            .min(self.max_reconnect_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Signing key from the configured seed, or a fresh random key
    ///
    /// # Errors
    /// `ConfigError::InvalidSeed` when the seed is not 32 hex-encoded bytes
    pub fn signing_key(&self) -> Result<SigningKey, ConfigError> {
        let Some(seed) = &self.signing_seed_hex else {
            return Ok(SigningKey::generate(&mut OsRng));
        };
        let bytes = hex::decode(seed.trim()).map_err(|_| ConfigError::InvalidSeed)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| ConfigError::InvalidSeed)?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credential_ttl_secs: 3600,
            bootstrap_timeout_ms: 5000,
            reconnect_backoff_ms: 100,
            max_reconnect_backoff_ms: 5000,
            max_note_len: 2000,
            temporary_secret_bytes: 4,
            signing_seed_hex: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("max_note_len = 50\n").unwrap();
        assert_eq!(config.max_note_len, 50);
        assert_eq!(config.credential_ttl_secs, 3600);
        assert_eq!(config.temporary_secret_bytes, 4);
    }

    #[test]
    fn rejects_zero_ttl() {
        let err = SyncConfig::from_toml_str("credential_ttl_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "credential_ttl_secs", .. }));
    }

    #[test]
    fn rejects_unrepresentable_ttl() {
        let err = SyncConfig::from_toml_str("credential_ttl_secs = 100000000000000000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "credential_ttl_secs", .. }));
        assert!(SyncConfig::from_toml_str("credential_ttl_secs = 31536000").is_ok());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let config = SyncConfig::new()
            .with_reconnect_backoff(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(0), Duration::from_millis(100));
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(800));
        assert_eq!(config.reconnect_delay(4), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(60), Duration::from_millis(1000));
    }

    #[test]
    fn seed_gives_stable_key() {
        let config = SyncConfig::new().with_signing_seed([7u8; 32]);
        let a = config.signing_key().unwrap();
        let b = config.signing_key().unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
    }

    #[test]
    fn bad_seed_is_rejected() {
        let config = SyncConfig {
            signing_seed_hex: Some("abcd".to_string()),
            ..SyncConfig::default()
        };
        assert!(matches!(config.signing_key(), Err(ConfigError::InvalidSeed)));
    }
}
