//! Error taxonomy for the attachment channel.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used by the stores and the encryption service.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Typed failures surfaced to callers of the channel.
///
/// Backend helpers return `anyhow::Result`; their errors are converted into
/// one of these variants at the store/service boundary so callers can always
/// tell what went wrong without string matching.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailure(String),

    #[error("Key import failed: {0}")]
    KeyImportFailure(String),

    #[error("No public key registered for contact: {0}")]
    NoSuchContactKey(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Persistence failure at {path}: {message}")]
    PersistenceFailure { path: PathBuf, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Identity is already bound to {active}, refusing to initialise {requested}")]
    ConcurrentInitializationConflict { requested: String, active: String },

    #[error("No local identity loaded; call ensure_keypair first")]
    IdentityUnavailable,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ChannelError {
    /// Build a persistence failure from an I/O error on `path`.
    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Stable machine-readable code, used by the request/response boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyGenerationFailure(_) => "KEY_GENERATION_FAILURE",
            Self::KeyImportFailure(_) => "KEY_IMPORT_FAILURE",
            Self::NoSuchContactKey(_) => "NO_SUCH_CONTACT_KEY",
            Self::EncryptionFailed(_) => "ENCRYPTION_FAILED",
            Self::DecryptionFailed(_) => "DECRYPTION_FAILED",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConcurrentInitializationConflict { .. } => {
                "CONCURRENT_INITIALIZATION_CONFLICT"
            }
            Self::IdentityUnavailable => "IDENTITY_UNAVAILABLE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}
