//! Core modules for the attachment channel
pub mod channel;
pub mod contacts;
pub mod identity;
pub mod keyring;
pub mod service;
pub mod storage;

pub use channel::AttachmentChannel;
pub use contacts::{ContactKeyStore, ImportOutcome, ReconcileReport};
pub use identity::{IdentityState, IdentityStore, LoadedIdentity};
pub use keyring::{ContactKey, KeyOwner, KeyRing};
pub use service::{DecryptInput, DecryptOutput, EncryptionService};
pub use storage::{KeyDirectory, ScratchSpace};
