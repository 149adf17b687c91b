//! Signed credentials and their bearer-token encoding
//!
//! Token layout: `hex(json claims) "." hex(ed25519 signature)`. The signature
//! covers a canonical byte message built from the claims, not the JSON text,
//! so field order in the encoded claims is irrelevant.

use crate::error::AuthError;
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use kinsync_model::{Role, SubjectId, TenantId};
use serde::{Deserialize, Serialize};

/// Verified identity of a caller
///
/// Immutable once issued; expiry is deterministic from `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub subject_id: SubjectId,
    pub role: Role,
    /// Present for tenant-scoped roles only
    pub tenant_id: Option<TenantId>,
    /// Shown as note author; carried so writes need no extra lookup
    pub display_name: String,
    /// Unix seconds
    pub issued_at: i64,
    /// Unix seconds
    pub expires_at: i64,
}

impl Credential {
    /// Whether the credential is expired at `now`
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at
    }

    /// Expiry as a timestamp
    #[must_use]
    pub fn expires(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Role/tenant combination is one the authority would issue
    #[must_use]
    pub fn has_valid_shape(&self) -> bool {
        self.role.requires_tenant() == self.tenant_id.is_some() && self.expires_at > self.issued_at
    }
}

/// Credential plus detached signature
#[derive(Debug, Clone)]
pub struct SignedCredential {
    pub credential: Credential,
    pub signature: Signature,
}

impl SignedCredential {
    /// Sign `credential` with the authority key
    #[must_use]
    pub fn sign(credential: Credential, signing_key: &SigningKey) -> Self {
        let message = credential_message(&credential);
        let signature = signing_key.sign(&message);
        Self {
            credential,
            signature,
        }
    }

    /// Check the signature against the authority's verifying key
    #[must_use]
    pub fn verify(&self, verifying_key: &VerifyingKey) -> bool {
        let message = credential_message(&self.credential);
        verifying_key.verify(&message, &self.signature).is_ok()
    }

    /// Bearer token string
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing a plain struct of strings and integers cannot fail.
        let claims = serde_json::to_vec(&self.credential).unwrap_or_default();
        format!(
            "{}.{}",
            hex::encode(claims),
            hex::encode(self.signature.to_bytes())
        )
    }

    /// Parse a bearer token; does not verify the signature
    ///
    /// # Errors
    /// `AuthError::Malformed` on any structural problem
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let (claims_hex, sig_hex) = token.split_once('.').ok_or(AuthError::Malformed)?;

        let claims = hex::decode(claims_hex).map_err(|_| AuthError::Malformed)?;
        let credential: Credential =
            serde_json::from_slice(&claims).map_err(|_| AuthError::Malformed)?;

        let sig_bytes = hex::decode(sig_hex).map_err(|_| AuthError::Malformed)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| AuthError::Malformed)?;

        Ok(Self {
            credential,
            signature,
        })
    }
}

fn credential_message(credential: &Credential) -> Vec<u8> {
    let mut msg = Vec::with_capacity(16 + 1 + 17 + 8 + 8 + credential.display_name.len());
    msg.extend_from_slice(credential.subject_id.0.as_bytes());
    msg.push(credential.role.as_u8());
    match credential.tenant_id {
        Some(tenant) => {
            msg.push(1);
            msg.extend_from_slice(tenant.0.as_bytes());
        }
        None => msg.push(0),
    }
    msg.extend_from_slice(&credential.issued_at.to_le_bytes());
    msg.extend_from_slice(&credential.expires_at.to_le_bytes());
    msg.extend_from_slice(credential.display_name.as_bytes());
    msg
}
