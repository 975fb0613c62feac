//! Common test setup and utilities for integration tests
//!
//! This module provides shared setup code for all integration tests.

#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use attachment_channel::{AttachmentChannel, ChannelConfig};

/// Initialize test logging (call once per test module)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("attachment_channel=debug,test=debug")
        .with_test_writer()
        .try_init();
}

/// Config rooted in `dir`, with a scratch directory next to the keys
pub fn config_in(dir: &Path) -> ChannelConfig {
    ChannelConfig::new(dir.join("keys")).with_scratch_dir(dir.join("scratch"))
}

/// A channel over a private temporary directory, backed by rPGP
pub struct TestNode {
    pub user_id: String,
    pub channel: AttachmentChannel,
    pub public_key: String,
    pub _temp_dir: tempfile::TempDir,
}

impl TestNode {
    /// Open a channel and create its identity
    pub async fn new(user_id: &str) -> Result<Self> {
        Self::with_config(user_id, |config| config).await
    }

    pub async fn with_config(
        user_id: &str,
        adjust: impl FnOnce(ChannelConfig) -> ChannelConfig,
    ) -> Result<Self> {
        init_test_logging();
        let temp_dir = tempfile::tempdir()?;
        let channel = AttachmentChannel::open_default(adjust(config_in(temp_dir.path()))).await?;
        let public_key = channel.ensure_keypair(user_id).await?;
        Ok(Self {
            user_id: user_id.to_string(),
            channel,
            public_key,
            _temp_dir: temp_dir,
        })
    }

    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Register `other` as a contact of this node
    pub async fn add_contact(&self, other: &TestNode) -> Result<()> {
        self.channel
            .import_contact_key(&other.user_id, &other.public_key)
            .await?;
        Ok(())
    }
}

/// Register two nodes with each other
pub async fn connect(a: &TestNode, b: &TestNode) -> Result<()> {
    a.add_contact(b).await?;
    b.add_contact(a).await?;
    Ok(())
}

/// Count regular files below `dir`, recursively
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
