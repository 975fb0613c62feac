//! Attachment channel - end-to-end encrypted file transfer between contacts
//!
//! This crate owns the local PGP identity, caches contact public keys on
//! disk, and encrypts/decrypts attachments with them.

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used items for convenience
pub use crate::config::ChannelConfig;
pub use crate::core::{AttachmentChannel, DecryptInput, DecryptOutput, ImportOutcome, KeyOwner};
pub use crate::error::{ChannelError, ChannelResult};
pub use crate::types::{Request, Response, ResponseBody};
