//! Cryptography module for the attachment channel.
//!
//! Everything here is a thin layer over rPGP; the key lifecycle and routing
//! logic lives in [`crate::core`].

pub mod pgp;

pub use self::pgp::{
    ArcPassphrase, PgpBackend, PgpKey, PgpKeyManager, PgpSealer, RpgpBackend, SecurePassphrase,
    Unsealed,
};
