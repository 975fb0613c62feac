//! Cached contact public keys.
//!
//! The file under `contacts/` is the source of truth; the keyring entry is
//! derived from it. Registration always writes the file before inserting the
//! keyring entry, so after a crash between the two steps the next startup
//! reconciliation restores the entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::keyring::{ContactKey, KeyRing};
use crate::core::storage::{validate_contact_id, KeyDirectory, WriteOutcome};
use crate::crypto::PgpBackend;
use crate::error::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    /// File and keyring entry were both present already; nothing changed.
    AlreadyPresent,
}

/// Outcome of scanning the contacts directory at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub imported: Vec<String>,
    /// Contact id and the reason the file was not imported.
    pub skipped: Vec<(String, String)>,
}

pub struct ContactKeyStore<B: PgpBackend> {
    backend: Arc<B>,
    directory: KeyDirectory,
    keyring: Arc<KeyRing<B::Key>>,
    registrations: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: PgpBackend> ContactKeyStore<B> {
    pub fn new(backend: Arc<B>, directory: KeyDirectory, keyring: Arc<KeyRing<B::Key>>) -> Self {
        Self {
            backend,
            directory,
            keyring,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Register a contact's armored public key.
    ///
    /// Concurrent and repeated registrations of the same contact converge on
    /// a single file and a single keyring entry. A cached key is never
    /// replaced: if a different key is already stored, the stored one stays.
    pub async fn import_key(
        &self,
        contact_id: &str,
        public_key_armored: &str,
    ) -> ChannelResult<ImportOutcome> {
        validate_contact_id(contact_id)?;
        let key = self.parse_public(public_key_armored).await?;

        let lock = self.registration_lock(contact_id).await;
        let _guard = lock.lock().await;

        let cached = self.keyring.contact(contact_id).await;
        let on_disk = self.directory.contact_exists(contact_id);
        if cached.is_some() && on_disk {
            tracing::debug!("Contact key for {} already cached", contact_id);
            return Ok(ImportOutcome::AlreadyPresent);
        }

        // A keyring entry without a file means the file was removed behind our
        // back; restore it from the cached key rather than the new input.
        let armored_to_write = match &cached {
            Some(contact) => self
                .backend
                .export_armored_public(&contact.key)
                .map_err(|e| ChannelError::persistence(&contact.path, e))?,
            None => public_key_armored.to_string(),
        };

        let directory = self.directory.clone();
        let owned_id = contact_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            directory.create_contact(&owned_id, &armored_to_write)
        })
        .await
        .map_err(|e| ChannelError::persistence(self.directory.contact_path(contact_id), e))??;

        if let Some(contact) = cached {
            tracing::warn!(
                "Restored missing key file for cached contact {} at {}",
                contact_id,
                contact.path.display()
            );
            return Ok(ImportOutcome::Imported);
        }

        let key = match outcome {
            WriteOutcome::Created => key,
            WriteOutcome::AlreadyExists => {
                let stored = self.read_stored(contact_id).await?.ok_or_else(|| {
                    ChannelError::persistence(
                        self.directory.contact_path(contact_id),
                        "contact key vanished",
                    )
                })?;
                if stored.trim() != public_key_armored.trim() {
                    tracing::warn!(
                        "Contact {} already has a different key on disk, keeping the stored key",
                        contact_id
                    );
                }
                self.parse_public(&stored).await?
            }
        };

        self.keyring
            .insert_contact(ContactKey {
                contact_id: contact_id.to_string(),
                key,
                path: self.directory.contact_path(contact_id),
            })
            .await;

        tracing::info!("Registered contact key for {}", contact_id);
        Ok(ImportOutcome::Imported)
    }

    /// True iff the contact has both a key file and a keyring entry.
    pub async fn is_available(&self, contact_id: &str) -> bool {
        if validate_contact_id(contact_id).is_err() {
            return false;
        }
        self.keyring.contains_contact(contact_id).await && self.directory.contact_exists(contact_id)
    }

    /// The cached key, only if the contact is fully available.
    pub async fn contact_key(&self, contact_id: &str) -> Option<ContactKey<B::Key>> {
        if !self.is_available(contact_id).await {
            return None;
        }
        self.keyring.contact(contact_id).await
    }

    pub async fn contact_ids(&self) -> Vec<String> {
        self.keyring.contact_ids().await
    }

    /// Import every key file under `contacts/` into the keyring.
    ///
    /// A file that cannot be read or parsed is skipped with a warning; the
    /// scan always runs to the end.
    pub async fn reconcile(&self) -> ChannelResult<ReconcileReport> {
        let directory = self.directory.clone();
        let ids = tokio::task::spawn_blocking(move || directory.list_contacts())
            .await
            .map_err(|e| ChannelError::persistence(self.directory.contacts_dir(), e))??;

        let mut report = ReconcileReport::default();
        for contact_id in ids {
            match self.load_from_disk(&contact_id).await {
                Ok(()) => report.imported.push(contact_id),
                Err(e) => {
                    tracing::warn!("Skipping contact key {}: {}", contact_id, e);
                    report.skipped.push((contact_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Contact reconciliation finished: {} imported, {} skipped",
            report.imported.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn read_stored(&self, contact_id: &str) -> ChannelResult<Option<String>> {
        let directory = self.directory.clone();
        let owned_id = contact_id.to_string();
        tokio::task::spawn_blocking(move || directory.read_contact(&owned_id))
            .await
            .map_err(|e| ChannelError::persistence(self.directory.contact_path(contact_id), e))?
    }

    async fn load_from_disk(&self, contact_id: &str) -> ChannelResult<()> {
        validate_contact_id(contact_id)?;

        let lock = self.registration_lock(contact_id).await;
        let _guard = lock.lock().await;

        if self.keyring.contains_contact(contact_id).await {
            return Ok(());
        }

        let armored = self.read_stored(contact_id).await?.ok_or_else(|| {
            ChannelError::persistence(self.directory.contact_path(contact_id), "file disappeared")
        })?;
        let key = self.parse_public(&armored).await?;

        self.keyring
            .insert_contact(ContactKey {
                contact_id: contact_id.to_string(),
                key,
                path: self.directory.contact_path(contact_id),
            })
            .await;
        Ok(())
    }

    async fn parse_public(&self, armored: &str) -> ChannelResult<B::Key> {
        let backend = Arc::clone(&self.backend);
        let owned = armored.to_string();
        let key = tokio::task::spawn_blocking(move || backend.import_armored_key(&owned))
            .await
            .map_err(|e| ChannelError::KeyImportFailure(e.to_string()))?
            .map_err(|e| ChannelError::KeyImportFailure(e.to_string()))?;

        if self.backend.export_armored_private(&key).is_ok() {
            return Err(ChannelError::KeyImportFailure(
                "Contact keys must be public keys, got a private key".to_string(),
            ));
        }
        Ok(key)
    }

    async fn registration_lock(&self, contact_id: &str) -> Arc<Mutex<()>> {
        let mut registrations = self.registrations.lock().await;
        Arc::clone(registrations.entry(contact_id.to_string()).or_default())
    }
}
