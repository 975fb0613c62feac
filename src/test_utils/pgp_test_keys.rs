//! PGP key generation utilities for testing
//!
//! Provides helpers for generating real rPGP keypairs without user interaction.

use crate::crypto::{PgpKey, PgpKeyManager, SecurePassphrase};
use anyhow::Result;

/// Test user with a real Ed25519 keypair
#[derive(Clone)]
pub struct TestUser {
    pub username: String,
    pub key: PgpKey,
    pub public_key_armored: String,
}

impl TestUser {
    /// Create a new test user with generated PGP keys
    pub fn new(username: &str) -> Result<Self> {
        let secret = PgpKeyManager::generate_keypair_secure(username, &SecurePassphrase::empty())?;
        let key = PgpKey::from_secret(secret);
        let public_key_armored = PgpKeyManager::public_key_armored(key.public_key())?;

        Ok(Self {
            username: username.to_string(),
            key,
            public_key_armored,
        })
    }

    /// The user's key as a contact would hold it: public half only.
    pub fn public_only(&self) -> Result<PgpKey> {
        PgpKeyManager::parse_armored_key(&self.public_key_armored)
    }

    /// Armored private key, as it would be stored in `user.key`.
    pub fn private_key_armored(&self) -> Result<String> {
        let secret = self
            .key
            .secret_key()
            .ok_or_else(|| anyhow::anyhow!("test user without secret key"))?;
        PgpKeyManager::secret_key_armored(secret)
    }
}

/// Generate a pair of users for direct attachment tests
pub fn generate_dm_pair() -> Result<(TestUser, TestUser)> {
    let sender = TestUser::new("sender")?;
    let recipient = TestUser::new("recipient")?;
    Ok((sender, recipient))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_user_creation() {
        let user = TestUser::new("alice").unwrap();

        assert_eq!(user.username, "alice");
        assert!(user.public_key_armored.contains("BEGIN PGP PUBLIC KEY"));
        assert!(user.public_only().unwrap().secret_key().is_none());
        assert!(user
            .private_key_armored()
            .unwrap()
            .contains("BEGIN PGP PRIVATE KEY"));
    }

    #[test]
    fn test_dm_pair_has_distinct_keys() {
        let (sender, recipient) = generate_dm_pair().unwrap();
        assert_ne!(sender.public_key_armored, recipient.public_key_armored);
    }
}
