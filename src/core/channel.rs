//! The attachment channel: one key directory, one backend, and the stores
//! and service built on them.

use std::path::Path;
use std::sync::Arc;

use crate::config::ChannelConfig;
use crate::core::contacts::{ContactKeyStore, ImportOutcome, ReconcileReport};
use crate::core::identity::{IdentityState, IdentityStore};
use crate::core::keyring::KeyRing;
use crate::core::service::{DecryptInput, DecryptOutput, EncryptionService};
use crate::core::storage::{KeyDirectory, ScratchSpace};
use crate::crypto::{PgpBackend, RpgpBackend};
use crate::error::{ChannelError, ChannelResult};
use crate::types::{decode_base64, Request, Response, ResponseBody};

/// Context object for every channel operation.
///
/// Channels share nothing, so several can be open in one process as long as
/// they use different key directories.
pub struct AttachmentChannel<B: PgpBackend = RpgpBackend> {
    directory: KeyDirectory,
    keyring: Arc<KeyRing<B::Key>>,
    identity: Arc<IdentityStore<B>>,
    contacts: Arc<ContactKeyStore<B>>,
    service: EncryptionService<B>,
    scratch: Arc<ScratchSpace>,
    startup_report: ReconcileReport,
}

impl AttachmentChannel<RpgpBackend> {
    /// Open a channel backed by rPGP, protecting stored keys with the
    /// configured passphrase.
    pub async fn open_default(config: ChannelConfig) -> ChannelResult<Self> {
        let backend = RpgpBackend::new(Arc::clone(&config.passphrase));
        Self::open(config, backend).await
    }
}

impl<B: PgpBackend> AttachmentChannel<B> {
    /// Prepare the key directory and import every cached contact key.
    ///
    /// Contact files that fail to parse are skipped and listed in
    /// [`AttachmentChannel::reconcile_report`].
    pub async fn open(config: ChannelConfig, backend: B) -> ChannelResult<Self> {
        let directory = KeyDirectory::new(&config.key_dir);
        directory.ensure_layout()?;
        let scratch = Arc::new(ScratchSpace::new(config.scratch_dir.clone())?);

        let backend = Arc::new(backend);
        let keyring = Arc::new(KeyRing::new());
        let identity = Arc::new(IdentityStore::new(
            Arc::clone(&backend),
            directory.clone(),
            Arc::clone(&keyring),
        ));
        let contacts = Arc::new(ContactKeyStore::new(
            Arc::clone(&backend),
            directory.clone(),
            Arc::clone(&keyring),
        ));
        let service = EncryptionService::new(
            backend,
            Arc::clone(&identity),
            Arc::clone(&contacts),
            Arc::clone(&keyring),
            Arc::clone(&scratch),
            config.always_sign,
            config.decrypt_timeout,
        );

        let startup_report = contacts.reconcile().await?;
        tracing::info!(
            "Attachment channel opened at {} ({} contact keys)",
            directory.root().display(),
            startup_report.imported.len()
        );

        Ok(Self {
            directory,
            keyring,
            identity,
            contacts,
            service,
            scratch,
            startup_report,
        })
    }

    pub async fn ensure_keypair(&self, user_id: &str) -> ChannelResult<String> {
        self.identity.ensure_keypair(user_id).await
    }

    pub async fn import_contact_key(
        &self,
        contact_id: &str,
        public_key_armored: &str,
    ) -> ChannelResult<ImportOutcome> {
        self.contacts.import_key(contact_id, public_key_armored).await
    }

    pub async fn is_contact_key_available(&self, contact_id: &str) -> bool {
        self.contacts.is_available(contact_id).await
    }

    pub async fn contact_ids(&self) -> Vec<String> {
        self.contacts.contact_ids().await
    }

    pub async fn encrypt(&self, plaintext: &[u8], recipient_id: &str) -> ChannelResult<String> {
        self.service.encrypt(plaintext, recipient_id).await
    }

    pub async fn decrypt(&self, input: DecryptInput) -> ChannelResult<DecryptOutput> {
        self.service.decrypt(input).await
    }

    /// Rescan `contacts/` for key files added since the channel was opened.
    pub async fn reconcile(&self) -> ChannelResult<ReconcileReport> {
        self.contacts.reconcile().await
    }

    pub async fn identity_state(&self) -> IdentityState {
        self.identity.state().await
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity.user_id()
    }

    /// What the startup scan imported and skipped.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.startup_report
    }

    pub async fn keyring_len(&self) -> usize {
        self.keyring.len().await
    }

    pub fn key_dir(&self) -> &Path {
        self.directory.root()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Run one boundary operation.
    pub async fn handle(&self, request: Request) -> Response {
        let op = request.op_name();
        match self.dispatch(request).await {
            Ok(body) => Response::ok(body),
            Err(e) => {
                tracing::warn!("{} failed: {}", op, e);
                Response::error(&e)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> ChannelResult<ResponseBody> {
        match request {
            Request::EnsureKeypairAvailable { user_id } => {
                let public_key = self.ensure_keypair(&user_id).await?;
                Ok(ResponseBody::PublicKey {
                    user_id,
                    public_key,
                })
            }
            Request::EncryptAttachment { data, recipient_id } => {
                let plaintext = decode_base64("data", &data)?;
                let armored = self.encrypt(&plaintext, &recipient_id).await?;
                Ok(ResponseBody::Ciphertext {
                    recipient_id,
                    armored,
                })
            }
            Request::DecryptAttachment { data, path } => {
                let input = match (data, path) {
                    (Some(data), None) => DecryptInput::Data(decode_base64("data", &data)?),
                    (None, Some(path)) => DecryptInput::Path(path),
                    _ => {
                        return Err(ChannelError::InvalidRequest(
                            "exactly one of data or path is required".to_string(),
                        ))
                    }
                };
                Ok(match self.decrypt(input).await? {
                    DecryptOutput::Data {
                        plaintext,
                        signed_by,
                    } => ResponseBody::plaintext(&plaintext, signed_by.map(|s| s.to_string())),
                    DecryptOutput::Path { path, signed_by } => ResponseBody::DecryptedFile {
                        path,
                        signed_by: signed_by.map(|s| s.to_string()),
                    },
                })
            }
            Request::ReceivedPubKey {
                contact_id,
                public_key,
            } => {
                let outcome = self.import_contact_key(&contact_id, &public_key).await?;
                Ok(ResponseBody::ContactKeyRegistered {
                    contact_id,
                    already_present: outcome == ImportOutcome::AlreadyPresent,
                })
            }
            Request::TestContactKeyAvailable { contact_id } => {
                let available = self.is_contact_key_available(&contact_id).await;
                Ok(ResponseBody::ContactKeyAvailable {
                    contact_id,
                    available,
                })
            }
        }
    }
}
