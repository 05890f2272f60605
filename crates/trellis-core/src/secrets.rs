//! Principal secrets and hashing helpers.
//!
//! A principal authenticates with a client id plus a secret; the store keeps
//! only SHA-256 hashes. Two hashes are retained so a rotation does not
//! immediately invalidate in-flight credentials: the previous main hash
//! becomes the secondary hash until the next rotation. A reset discards both
//! and issues entirely new material.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::id::EntityId;

/// Hashes secret material to its stored hex digest.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generates fresh random secret material (32 bytes, hex-encoded).
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Generates a fresh client id.
#[must_use]
pub fn generate_client_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

/// Credential record of one principal, keyed by client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalSecrets {
    /// Client id; also stored in the principal's internal properties.
    pub principal_client_id: String,
    /// Id of the owning principal entity.
    pub principal_id: EntityId,
    /// Hash of the current secret.
    pub main_secret_hash: String,
    /// Hash of the previous secret, still accepted until the next rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_secret_hash: Option<String>,
    /// Plaintext of the current secret; only populated on the call that
    /// generated or rotated it, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_secret: Option<String>,
}

impl PrincipalSecrets {
    /// Generates a brand-new credential record with fresh client id and
    /// secret; the plaintext is carried back to the caller exactly once.
    #[must_use]
    pub fn generate(principal_id: EntityId) -> Self {
        let secret = generate_secret();
        Self {
            principal_client_id: generate_client_id(),
            principal_id,
            main_secret_hash: hash_secret(&secret),
            secondary_secret_hash: None,
            main_secret: Some(secret),
        }
    }

    /// Rotates the secret: the supplied old hash becomes the secondary
    /// hash and a fresh secret becomes the main one.
    pub fn rotate(&mut self, old_secret_hash: &str) {
        let secret = generate_secret();
        self.secondary_secret_hash = Some(old_secret_hash.to_owned());
        self.main_secret_hash = hash_secret(&secret);
        self.main_secret = Some(secret);
    }

    /// Resets the credentials entirely: both hashes are replaced and no
    /// previous secret remains valid.
    pub fn reset(&mut self) {
        let secret = generate_secret();
        self.secondary_secret_hash = None;
        self.main_secret_hash = hash_secret(&secret);
        self.main_secret = Some(secret);
    }

    /// Returns true if the supplied hash matches the current or the
    /// previous secret.
    #[must_use]
    pub fn matches_hash(&self, hash: &str) -> bool {
        self.main_secret_hash == hash || self.secondary_secret_hash.as_deref() == Some(hash)
    }

    /// Returns a copy with the transient plaintext stripped, suitable for
    /// persisting.
    #[must_use]
    pub fn stored(&self) -> Self {
        let mut copy = self.clone();
        copy.main_secret = None;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_carry_plaintext_once() {
        let secrets = PrincipalSecrets::generate(EntityId::new(5));
        let plaintext = secrets.main_secret.clone().unwrap();
        assert_eq!(hash_secret(&plaintext), secrets.main_secret_hash);
        assert!(secrets.stored().main_secret.is_none());
    }

    #[test]
    fn rotation_keeps_previous_hash_valid() {
        let mut secrets = PrincipalSecrets::generate(EntityId::new(5));
        let old_hash = secrets.main_secret_hash.clone();
        secrets.rotate(&old_hash);
        assert!(secrets.matches_hash(&old_hash));
        assert_ne!(secrets.main_secret_hash, old_hash);
    }

    #[test]
    fn reset_invalidates_previous_hash() {
        let mut secrets = PrincipalSecrets::generate(EntityId::new(5));
        let old_hash = secrets.main_secret_hash.clone();
        secrets.reset();
        assert!(!secrets.matches_hash(&old_hash));
        assert!(secrets.secondary_secret_hash.is_none());
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }
}
