//! Session Authority
//!
//! Issues signed, time-limited credentials and verifies bearer tokens.
//!
//! Verification checks, in order:
//! 1. Token structure and signature (`Malformed`)
//! 2. Expiry (`Expired`)
//! 3. Role/tenant shape (`Malformed`)
//! 4. Subject still active in the store (`Revoked`), one store read
//!
//! Deactivation is never cached in the token; step 4 always consults current
//! store state.

use crate::credential::{Credential, SignedCredential};
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use kinsync_model::{Role, SubjectId, TenantId};
use std::sync::Arc;

/// Store-backed lookup of whether a subject may still act
#[async_trait]
pub trait SubjectRegistry: Send + Sync {
    /// `Ok(false)` for deactivated or unknown subjects
    async fn is_subject_active(&self, role: Role, subject: SubjectId) -> anyhow::Result<bool>;
}

/// Freshly issued credential with its bearer token
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub token: String,
}

/// Issues and verifies session credentials
pub struct SessionAuthority {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    ttl_secs: i64,
    registry: Arc<dyn SubjectRegistry>,
}

impl std::fmt::Debug for SessionAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthority")
            .field("verifying_key", &hex::encode(self.verifying_key.as_bytes()))
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl SessionAuthority {
    /// Create an authority signing with `signing_key`
    ///
    /// Expiry saturates at the largest representable timestamp.
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        ttl: std::time::Duration,
        registry: Arc<dyn SubjectRegistry>,
    ) -> Self {
        let verifying_key = signing_key.verifying_key();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        Self {
            signing_key,
            verifying_key,
            ttl_secs,
            registry,
        }
    }

    /// Public half of the signing key
    #[inline]
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    /// Issue a credential valid from now for the configured TTL
    ///
    /// # Errors
    /// `AuthError::InvalidActor` if a tenant-scoped role lacks a tenant, or a
    /// super-administrator is given one
    pub fn issue(
        &self,
        role: Role,
        subject: SubjectId,
        tenant: Option<TenantId>,
        display_name: &str,
    ) -> Result<IssuedCredential, AuthError> {
        self.issue_at(role, subject, tenant, display_name, Utc::now())
    }

    /// [`Self::issue`] with an explicit clock
    ///
    /// # Errors
    /// See [`Self::issue`]
    pub fn issue_at(
        &self,
        role: Role,
        subject: SubjectId,
        tenant: Option<TenantId>,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredential, AuthError> {
        match (role.requires_tenant(), tenant.is_some()) {
            (true, false) => return Err(AuthError::InvalidActor("role requires a tenant")),
            (false, true) => return Err(AuthError::InvalidActor("role cannot carry a tenant")),
            _ => {}
        }

        let issued_at = now.timestamp();
        let credential = Credential {
            subject_id: subject,
            role,
            tenant_id: tenant,
            display_name: display_name.to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(self.ttl_secs),
        };

        let signed = SignedCredential::sign(credential, &self.signing_key);
        tracing::debug!(subject = %subject, %role, "issued credential");

        Ok(IssuedCredential {
            token: signed.encode(),
            credential: signed.credential,
        })
    }

    /// Verify a bearer token against the current clock and store state
    ///
    /// # Errors
    /// `Malformed`, `Expired`, `Revoked`, or `Unavailable` when the activity
    /// lookup fails
    pub async fn verify(&self, token: &str) -> Result<Credential, AuthError> {
        self.verify_at(token, Utc::now()).await
    }

    /// [`Self::verify`] with an explicit clock
    ///
    /// # Errors
    /// See [`Self::verify`]
    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        let credential = self.verify_integrity(token, now)?;

        let active = self
            .registry
            .is_subject_active(credential.role, credential.subject_id)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if active {
            Ok(credential)
        } else {
            tracing::debug!(subject = %credential.subject_id, role = %credential.role, "credential revoked");
            Err(AuthError::Revoked)
        }
    }

    /// Signature, expiry and shape checks only; no store access
    ///
    /// # Errors
    /// `Malformed` or `Expired`
    pub fn verify_integrity(&self, token: &str, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        let signed = SignedCredential::decode(token)?;

        if !signed.verify(&self.verifying_key) {
            return Err(AuthError::Malformed);
        }
        if signed.credential.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        if !signed.credential.has_valid_shape() {
            return Err(AuthError::Malformed);
        }

        Ok(signed.credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;
    use rand::rngs::OsRng;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Registry {
        inactive: Mutex<HashSet<SubjectId>>,
        offline: Mutex<bool>,
    }

    #[async_trait]
    impl SubjectRegistry for Registry {
        async fn is_subject_active(&self, _role: Role, subject: SubjectId) -> anyhow::Result<bool> {
            if *self.offline.lock() {
                anyhow::bail!("store offline");
            }
            Ok(!self.inactive.lock().contains(&subject))
        }
    }

    fn make_authority() -> (SessionAuthority, Arc<Registry>) {
        let registry = Arc::new(Registry::default());
        let authority = SessionAuthority::new(
            SigningKey::generate(&mut OsRng),
            std::time::Duration::from_secs(3600),
            registry.clone(),
        );
        (authority, registry)
    }

    #[test]
    fn oversized_ttl_saturates_expiry() {
        let authority = SessionAuthority::new(
            SigningKey::generate(&mut OsRng),
            std::time::Duration::from_secs(u64::MAX),
            Arc::new(Registry::default()),
        );
        let issued = authority
            .issue(Role::Admin, SubjectId::new(), Some(TenantId::new()), "Ada")
            .unwrap();
        assert_eq!(issued.credential.expires_at, i64::MAX);
        assert!(!issued.credential.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn valid_token_verifies() {
        let (authority, _) = make_authority();
        let tenant = TenantId::new();
        let issued = authority
            .issue(Role::Admin, SubjectId::new(), Some(tenant), "Ada")
            .unwrap();

        let credential = authority.verify(&issued.token).await.unwrap();
        assert_eq!(credential.tenant_id, Some(tenant));
        assert_eq!(credential.role, Role::Admin);
    }

    #[test]
    fn admin_without_tenant_is_invalid_actor() {
        let (authority, _) = make_authority();
        let result = authority.issue(Role::Admin, SubjectId::new(), None, "Ada");
        assert!(matches!(result, Err(AuthError::InvalidActor(_))));
    }

    #[test]
    fn super_admin_with_tenant_is_invalid_actor() {
        let (authority, _) = make_authority();
        let result = authority.issue(Role::SuperAdmin, SubjectId::new(), Some(TenantId::new()), "Op");
        assert!(matches!(result, Err(AuthError::InvalidActor(_))));
    }

    #[tokio::test]
    async fn expired_token_fails() {
        let (authority, _) = make_authority();
        let issued_at = Utc::now() - Duration::hours(2);
        let issued = authority
            .issue_at(Role::Admin, SubjectId::new(), Some(TenantId::new()), "Ada", issued_at)
            .unwrap();

        assert_eq!(authority.verify(&issued.token).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn token_from_other_authority_is_malformed() {
        let (authority, _) = make_authority();
        let (other, _) = make_authority();
        let issued = other
            .issue(Role::Admin, SubjectId::new(), Some(TenantId::new()), "Ada")
            .unwrap();

        assert_eq!(authority.verify(&issued.token).await, Err(AuthError::Malformed));
    }

    #[tokio::test]
    async fn deactivation_after_issuance_revokes() {
        let (authority, registry) = make_authority();
        let subject = SubjectId::new();
        let issued = authority
            .issue(Role::Admin, subject, Some(TenantId::new()), "Ada")
            .unwrap();
        assert!(authority.verify(&issued.token).await.is_ok());

        registry.inactive.lock().insert(subject);
        assert_eq!(authority.verify(&issued.token).await, Err(AuthError::Revoked));
    }

    #[tokio::test]
    async fn offline_registry_is_unavailable() {
        let (authority, registry) = make_authority();
        let issued = authority
            .issue(Role::SuperAdmin, SubjectId::new(), None, "Op")
            .unwrap();
        *registry.offline.lock() = true;

        let result = authority.verify(&issued.token).await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));
    }
}
