//! Channel configuration.
//!
//! Values come from the process environment (after `.env` has been loaded by
//! the binary) and can be overridden by CLI flags.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::crypto::{ArcPassphrase, SecurePassphrase};

pub const ENV_KEY_DIR: &str = "ATTACHMENT_KEY_DIR";
pub const ENV_ALWAYS_SIGN: &str = "ATTACHMENT_ALWAYS_SIGN";
pub const ENV_DECRYPT_TIMEOUT_MS: &str = "ATTACHMENT_DECRYPT_TIMEOUT_MS";
pub const ENV_SCRATCH_DIR: &str = "ATTACHMENT_SCRATCH_DIR";
pub const ENV_KEY_PASSPHRASE: &str = "ATTACHMENT_KEY_PASSPHRASE";

pub const DEFAULT_KEY_DIR: &str = "storage/keys";
pub const DEFAULT_DECRYPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one [`AttachmentChannel`](crate::core::AttachmentChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Root of the key directory (`user.key` plus `contacts/`).
    pub key_dir: PathBuf,
    /// Sign every outgoing attachment with the local identity.
    pub always_sign: bool,
    /// Upper bound on reading and unsealing one attachment.
    pub decrypt_timeout: Duration,
    /// Where decrypted files are written. `None` uses a temporary directory
    /// owned by the channel and removed with it.
    pub scratch_dir: Option<PathBuf>,
    /// Locks the stored secret key; required again to load it.
    pub passphrase: ArcPassphrase,
}

impl ChannelConfig {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            always_sign: true,
            decrypt_timeout: DEFAULT_DECRYPT_TIMEOUT,
            scratch_dir: None,
            passphrase: Arc::new(SecurePassphrase::empty()),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key_dir = lookup(ENV_KEY_DIR).unwrap_or_else(|| DEFAULT_KEY_DIR.to_string());
        let mut config = Self::new(key_dir);

        if let Some(value) = lookup(ENV_ALWAYS_SIGN) {
            config.always_sign = parse_bool(&value)
                .ok_or_else(|| anyhow!("{} must be true or false, got {:?}", ENV_ALWAYS_SIGN, value))?;
        }

        if let Some(value) = lookup(ENV_DECRYPT_TIMEOUT_MS) {
            let millis: u64 = value.trim().parse().map_err(|e| {
                anyhow!("{} must be a number of milliseconds: {}", ENV_DECRYPT_TIMEOUT_MS, e)
            })?;
            if millis == 0 {
                return Err(anyhow!("{} must be greater than zero", ENV_DECRYPT_TIMEOUT_MS));
            }
            config.decrypt_timeout = Duration::from_millis(millis);
        }

        config.scratch_dir = lookup(ENV_SCRATCH_DIR)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        if let Some(passphrase) = lookup(ENV_KEY_PASSPHRASE) {
            config.passphrase = Arc::new(SecurePassphrase::new(passphrase));
        }

        Ok(config)
    }

    pub fn with_always_sign(mut self, always_sign: bool) -> Self {
        self.always_sign = always_sign;
        self
    }

    pub fn with_decrypt_timeout(mut self, timeout: Duration) -> Self {
        self.decrypt_timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: SecurePassphrase) -> Self {
        self.passphrase = Arc::new(passphrase);
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
