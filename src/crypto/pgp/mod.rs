//! PGP cryptographic operations.
//!
//! This module handles:
//! - PGP key generation, import and armored export (Ed25519)
//! - Sealing attachments for a recipient, optionally signed
//! - Trial unsealing against a keyring
//! - The [`PgpBackend`] seam the rest of the crate is written against

pub mod backend;
pub mod keypair;
pub mod sealing;

pub use backend::{PgpBackend, RpgpBackend};
pub use keypair::{PgpKey, PgpKeyManager, SecurePassphrase};
pub use sealing::{PgpSealer, Unsealed};

use std::sync::Arc;

/// Arc-wrapped passphrase for efficient sharing across blocking tasks.
pub type ArcPassphrase = Arc<SecurePassphrase>;
