//! Attachment encryption and keyring-routed decryption.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::contacts::ContactKeyStore;
use crate::core::identity::IdentityStore;
use crate::core::keyring::{KeyOwner, KeyRing};
use crate::core::storage::ScratchSpace;
use crate::crypto::PgpBackend;
use crate::error::{ChannelError, ChannelResult};

/// Where the ciphertext for a decrypt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptInput {
    Data(Vec<u8>),
    /// Read the ciphertext from this file; the plaintext is written to a new
    /// file in the scratch directory.
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutput {
    Data {
        plaintext: Vec<u8>,
        signed_by: Option<KeyOwner>,
    },
    Path {
        path: PathBuf,
        signed_by: Option<KeyOwner>,
    },
}

impl DecryptOutput {
    pub fn signed_by(&self) -> Option<&KeyOwner> {
        match self {
            Self::Data { signed_by, .. } | Self::Path { signed_by, .. } => signed_by.as_ref(),
        }
    }
}

/// Encrypts for registered contacts and decrypts with any keyring member.
///
/// Reads the stores but never mutates them, so any number of encrypts and
/// decrypts may run at once.
pub struct EncryptionService<B: PgpBackend> {
    backend: Arc<B>,
    identity: Arc<IdentityStore<B>>,
    contacts: Arc<ContactKeyStore<B>>,
    keyring: Arc<KeyRing<B::Key>>,
    scratch: Arc<ScratchSpace>,
    always_sign: bool,
    decrypt_timeout: Duration,
}

impl<B: PgpBackend> EncryptionService<B> {
    pub fn new(
        backend: Arc<B>,
        identity: Arc<IdentityStore<B>>,
        contacts: Arc<ContactKeyStore<B>>,
        keyring: Arc<KeyRing<B::Key>>,
        scratch: Arc<ScratchSpace>,
        always_sign: bool,
        decrypt_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            identity,
            contacts,
            keyring,
            scratch,
            always_sign,
            decrypt_timeout,
        }
    }

    /// Seal `plaintext` for `recipient_id` and return armored ciphertext.
    ///
    /// With `always_sign` the local identity must be loaded and signs every
    /// message; without it messages are never signed.
    pub async fn encrypt(&self, plaintext: &[u8], recipient_id: &str) -> ChannelResult<String> {
        let contact = self
            .contacts
            .contact_key(recipient_id)
            .await
            .ok_or_else(|| ChannelError::NoSuchContactKey(recipient_id.to_string()))?;

        let signer = if self.always_sign {
            let identity = self
                .identity
                .loaded()
                .ok_or(ChannelError::IdentityUnavailable)?;
            Some(identity.key.clone())
        } else {
            None
        };

        let backend = Arc::clone(&self.backend);
        let plaintext = plaintext.to_vec();
        let signed = signer.is_some();
        let armored = tokio::task::spawn_blocking(move || {
            backend.seal(&plaintext, &contact.key, signer.as_ref())
        })
        .await
        .map_err(|e| ChannelError::EncryptionFailed(e.to_string()))?
        .map_err(|e| ChannelError::EncryptionFailed(e.to_string()))?;

        tracing::info!(
            "Encrypted attachment for {} (signed={})",
            recipient_id,
            signed
        );
        Ok(armored)
    }

    /// Decrypt with whichever keyring member the message is addressed to.
    ///
    /// The timeout bounds reading a path input and the unseal. Writing the
    /// output file runs to completion once started.
    pub async fn decrypt(&self, input: DecryptInput) -> ChannelResult<DecryptOutput> {
        let to_file = matches!(input, DecryptInput::Path(_));
        let (plaintext, signed_by) =
            match tokio::time::timeout(self.decrypt_timeout, self.open_sealed(input)).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!("Decrypt timed out after {:?}", self.decrypt_timeout);
                    return Err(ChannelError::Timeout(self.decrypt_timeout));
                }
            };

        if !to_file {
            return Ok(DecryptOutput::Data {
                plaintext,
                signed_by,
            });
        }

        let scratch = Arc::clone(&self.scratch);
        let path = tokio::task::spawn_blocking(move || scratch.write_unique(&plaintext))
            .await
            .map_err(|e| ChannelError::persistence(self.scratch.path(), e))??;

        Ok(DecryptOutput::Path { path, signed_by })
    }

    async fn open_sealed(
        &self,
        input: DecryptInput,
    ) -> ChannelResult<(Vec<u8>, Option<KeyOwner>)> {
        let ciphertext = match input {
            DecryptInput::Data(data) => data,
            DecryptInput::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| ChannelError::persistence(&path, e))?,
        };

        let (owners, keys): (Vec<KeyOwner>, Vec<B::Key>) =
            self.keyring.snapshot().await.into_iter().unzip();
        if keys.is_empty() {
            return Err(ChannelError::DecryptionFailed(
                "keyring is empty".to_string(),
            ));
        }

        let backend = Arc::clone(&self.backend);
        let unsealed = tokio::task::spawn_blocking(move || backend.unseal(&ciphertext, &keys))
            .await
            .map_err(|e| ChannelError::DecryptionFailed(e.to_string()))?
            .map_err(|e| ChannelError::DecryptionFailed(e.to_string()))?;

        let recipient = owners.get(unsealed.recipient_index).ok_or_else(|| {
            ChannelError::DecryptionFailed("backend reported an unknown recipient".to_string())
        })?;
        let signed_by = unsealed
            .signer_index
            .and_then(|index| owners.get(index).cloned());

        tracing::info!(
            "Decrypted {} byte attachment addressed to {}",
            unsealed.plaintext.len(),
            recipient
        );
        if let Some(signer) = &signed_by {
            tracing::debug!("Attachment signature verified for {}", signer);
        }

        Ok((unsealed.plaintext, signed_by))
    }
}
