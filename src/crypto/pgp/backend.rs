//! Backend abstraction over the PGP primitives.
//!
//! The stores and the encryption service only ever talk to a [`PgpBackend`],
//! which keeps them testable with a deterministic in-memory backend and lets
//! the rPGP implementation stay confined to this module tree.

use anyhow::{anyhow, Result};

use crate::crypto::pgp::keypair::{PgpKey, PgpKeyManager, SecurePassphrase};
use crate::crypto::pgp::sealing::{PgpSealer, Unsealed};
use crate::crypto::pgp::ArcPassphrase;

/// Key primitives consumed by the attachment channel.
///
/// Implementations are called from blocking worker threads, so they must be
/// cheap to share (`Send + Sync`) and keys must be cheap to clone.
pub trait PgpBackend: Send + Sync + 'static {
    /// Opaque handle to key material (public or full keypair).
    type Key: Clone + Send + Sync + 'static;

    /// Generate and self-certify a new keypair for `user_id`.
    fn generate_keypair(&self, user_id: &str) -> Result<Self::Key>;

    /// Parse an armored key, secret or public.
    fn import_armored_key(&self, armored: &str) -> Result<Self::Key>;

    fn export_armored_public(&self, key: &Self::Key) -> Result<String>;

    /// Fails for public-only keys.
    fn export_armored_private(&self, key: &Self::Key) -> Result<String>;

    fn primary_user_id(&self, key: &Self::Key) -> Option<String>;

    /// Encrypt for `recipient`, signing with `signer` when given.
    fn seal(
        &self,
        plaintext: &[u8],
        recipient: &Self::Key,
        signer: Option<&Self::Key>,
    ) -> Result<String>;

    /// Decrypt with whichever member of `keyring` the message is addressed to.
    fn unseal(&self, ciphertext: &[u8], keyring: &[Self::Key]) -> Result<Unsealed>;
}

/// Production backend built on rPGP.
#[derive(Clone)]
pub struct RpgpBackend {
    passphrase: ArcPassphrase,
}

impl RpgpBackend {
    /// `passphrase` unlocks the local secret key for signing and decryption.
    pub fn new(passphrase: ArcPassphrase) -> Self {
        Self { passphrase }
    }
}

impl Default for RpgpBackend {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(SecurePassphrase::empty()))
    }
}

impl PgpBackend for RpgpBackend {
    type Key = PgpKey;

    fn generate_keypair(&self, user_id: &str) -> Result<PgpKey> {
        let secret = PgpKeyManager::generate_keypair_secure(user_id, &self.passphrase)?;
        Ok(PgpKey::from_secret(secret))
    }

    fn import_armored_key(&self, armored: &str) -> Result<PgpKey> {
        let key = PgpKeyManager::parse_armored_key(armored)?;
        if let Some(secret) = key.secret_key() {
            PgpKeyManager::check_passphrase(secret, &self.passphrase)?;
            if !self.passphrase.as_str().is_empty() && !PgpKeyManager::is_locked(secret) {
                tracing::warn!("Stored secret key is not passphrase-protected");
            }
        }
        Ok(key)
    }

    fn export_armored_public(&self, key: &PgpKey) -> Result<String> {
        PgpKeyManager::public_key_armored(key.public_key())
    }

    fn export_armored_private(&self, key: &PgpKey) -> Result<String> {
        let secret = key
            .secret_key()
            .ok_or_else(|| anyhow!("Key holds no secret material"))?;
        PgpKeyManager::secret_key_armored(secret)
    }

    fn primary_user_id(&self, key: &PgpKey) -> Option<String> {
        PgpKeyManager::primary_user_id(key.public_key())
    }

    fn seal(&self, plaintext: &[u8], recipient: &PgpKey, signer: Option<&PgpKey>) -> Result<String> {
        PgpSealer::seal(plaintext, recipient, signer, &self.passphrase)
    }

    fn unseal(&self, ciphertext: &[u8], keyring: &[PgpKey]) -> Result<Unsealed> {
        PgpSealer::unseal(ciphertext, keyring, &self.passphrase)
    }
}
