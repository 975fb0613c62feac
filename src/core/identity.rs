//! Local identity keypair lifecycle.
//!
//! `Uninitialized -> {Generating | Loading} -> Loaded`. `Loaded` is terminal;
//! a failure or a dropped caller in either intermediate state falls back to
//! `Uninitialized` so the caller can retry.

use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::core::keyring::KeyRing;
use crate::core::storage::{KeyDirectory, WriteOutcome};
use crate::crypto::PgpBackend;
use crate::error::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    Uninitialized,
    Generating,
    Loading,
    Loaded,
}

/// The local user's keypair once it is usable.
#[derive(Debug)]
pub struct LoadedIdentity<K> {
    pub user_id: String,
    pub key: K,
    pub public_key_armored: String,
}

/// Owns the one identity of a key directory.
pub struct IdentityStore<B: PgpBackend> {
    backend: Arc<B>,
    directory: KeyDirectory,
    keyring: Arc<KeyRing<B::Key>>,
    state: Mutex<IdentityState>,
    identity: OnceCell<Arc<LoadedIdentity<B::Key>>>,
}

impl<B: PgpBackend> IdentityStore<B> {
    pub fn new(backend: Arc<B>, directory: KeyDirectory, keyring: Arc<KeyRing<B::Key>>) -> Self {
        Self {
            backend,
            directory,
            keyring,
            state: Mutex::new(IdentityState::Uninitialized),
            identity: OnceCell::new(),
        }
    }

    /// Load or generate the identity for `user_id` and return its armored
    /// public key.
    ///
    /// Callers that arrive while initialisation is running wait for it and
    /// share its result, so there is at most one generation and one write of
    /// `user.key` per store.
    pub async fn ensure_keypair(&self, user_id: &str) -> ChannelResult<String> {
        if user_id.trim().is_empty() {
            return Err(ChannelError::InvalidRequest(
                "User id must not be empty".to_string(),
            ));
        }

        let identity = self
            .identity
            .get_or_try_init(|| self.initialize(user_id))
            .await?;

        if identity.user_id != user_id {
            return Err(ChannelError::ConcurrentInitializationConflict {
                requested: user_id.to_string(),
                active: identity.user_id.clone(),
            });
        }

        Ok(identity.public_key_armored.clone())
    }

    pub async fn state(&self) -> IdentityState {
        *lock_state(&self.state)
    }

    /// The identity, if it has reached `Loaded`.
    pub fn loaded(&self) -> Option<Arc<LoadedIdentity<B::Key>>> {
        self.identity.get().cloned()
    }

    pub fn public_key(&self) -> Option<String> {
        self.identity.get().map(|id| id.public_key_armored.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity.get().map(|id| id.user_id.clone())
    }

    async fn initialize(&self, user_id: &str) -> ChannelResult<Arc<LoadedIdentity<B::Key>>> {
        // Covers both a failed attempt and a caller dropping this future.
        let reset = ResetOnDrop {
            state: &self.state,
            armed: true,
        };

        match self.load_or_generate(user_id).await {
            Ok(identity) => {
                self.keyring
                    .set_identity(&identity.user_id, identity.key.clone())
                    .await;
                self.set_state(IdentityState::Loaded);
                reset.disarm();
                tracing::info!("Identity loaded for user: {}", identity.user_id);
                Ok(Arc::new(identity))
            }
            Err(e) => {
                tracing::error!("Identity initialisation failed for {}: {}", user_id, e);
                Err(e)
            }
        }
    }

    async fn load_or_generate(&self, user_id: &str) -> ChannelResult<LoadedIdentity<B::Key>> {
        let directory = self.directory.clone();
        let stored = tokio::task::spawn_blocking(move || directory.read_identity())
            .await
            .map_err(|e| ChannelError::persistence(self.directory.identity_path(), e))??;

        if let Some(armored) = stored {
            self.set_state(IdentityState::Loading);
            return self.import_stored(user_id, armored).await;
        }

        self.set_state(IdentityState::Generating);
        tracing::info!("No identity key on disk, generating one for {}", user_id);

        let backend = Arc::clone(&self.backend);
        let owned_user_id = user_id.to_string();
        let key = tokio::task::spawn_blocking(move || backend.generate_keypair(&owned_user_id))
            .await
            .map_err(|e| ChannelError::KeyGenerationFailure(e.to_string()))?
            .map_err(|e| ChannelError::KeyGenerationFailure(e.to_string()))?;

        let identity_path = self.directory.identity_path();
        let private_armored = self
            .backend
            .export_armored_private(&key)
            .map_err(|e| ChannelError::persistence(&identity_path, e))?;
        let public_key_armored = self
            .backend
            .export_armored_public(&key)
            .map_err(|e| ChannelError::KeyGenerationFailure(e.to_string()))?;

        let directory = self.directory.clone();
        let outcome = tokio::task::spawn_blocking(move || directory.create_identity(&private_armored))
            .await
            .map_err(|e| ChannelError::persistence(&identity_path, e))??;

        match outcome {
            WriteOutcome::Created => {
                tracing::info!("Saved identity key to {}", identity_path.display());
                Ok(LoadedIdentity {
                    user_id: user_id.to_string(),
                    key,
                    public_key_armored,
                })
            }
            WriteOutcome::AlreadyExists => {
                // Another process stored an identity first; the file wins.
                tracing::warn!(
                    "Identity key appeared at {} during generation, using the stored key",
                    identity_path.display()
                );
                self.set_state(IdentityState::Loading);
                let directory = self.directory.clone();
                let armored = tokio::task::spawn_blocking(move || directory.read_identity())
                    .await
                    .map_err(|e| ChannelError::persistence(&identity_path, e))??
                    .ok_or_else(|| {
                        ChannelError::persistence(&identity_path, "identity key vanished")
                    })?;
                self.import_stored(user_id, armored).await
            }
        }
    }

    async fn import_stored(
        &self,
        user_id: &str,
        armored: String,
    ) -> ChannelResult<LoadedIdentity<B::Key>> {
        let backend = Arc::clone(&self.backend);
        let key = tokio::task::spawn_blocking(move || backend.import_armored_key(&armored))
            .await
            .map_err(|e| ChannelError::KeyImportFailure(e.to_string()))?
            .map_err(|e| ChannelError::KeyImportFailure(e.to_string()))?;

        if self.backend.export_armored_private(&key).is_err() {
            return Err(ChannelError::KeyImportFailure(format!(
                "{} does not hold a private key",
                self.directory.identity_path().display()
            )));
        }

        if let Some(stored_user_id) = self.backend.primary_user_id(&key) {
            if stored_user_id != user_id {
                return Err(ChannelError::ConcurrentInitializationConflict {
                    requested: user_id.to_string(),
                    active: stored_user_id,
                });
            }
        }

        let public_key_armored = self
            .backend
            .export_armored_public(&key)
            .map_err(|e| ChannelError::KeyImportFailure(e.to_string()))?;

        Ok(LoadedIdentity {
            user_id: user_id.to_string(),
            key,
            public_key_armored,
        })
    }

    fn set_state(&self, state: IdentityState) {
        let mut current = lock_state(&self.state);
        tracing::debug!("Identity state {:?} -> {:?}", *current, state);
        *current = state;
    }
}

fn lock_state(state: &Mutex<IdentityState>) -> std::sync::MutexGuard<'_, IdentityState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Puts the state back to `Uninitialized` unless initialisation completed.
struct ResetOnDrop<'a> {
    state: &'a Mutex<IdentityState>,
    armed: bool,
}

impl ResetOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut current = lock_state(self.state);
            tracing::debug!("Identity state {:?} -> Uninitialized", *current);
            *current = IdentityState::Uninitialized;
        }
    }
}
