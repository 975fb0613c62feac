//! On-disk key directory.
//!
//! Layout:
//!
//! ```text
//! <key_dir>/
//!     user.key            armored private identity key (0o600)
//!     contacts/
//!         <contact_id>    armored public key (0o644)
//! ```
//!
//! Every key file is created with create-if-absent semantics: the content is
//! written to a temporary file in the same directory and then linked into
//! place without clobbering, so a reader never sees a partially written key
//! and two writers never both "win".

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile, TempDir};

use crate::error::{ChannelError, ChannelResult};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const IDENTITY_KEY_FILE: &str = "user.key";
pub const CONTACTS_DIR: &str = "contacts";

const MAX_CONTACT_ID_LEN: usize = 64;

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyExists,
}

/// Handle on a key directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    root: PathBuf,
}

impl KeyDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_path(&self) -> PathBuf {
        self.root.join(IDENTITY_KEY_FILE)
    }

    pub fn contacts_dir(&self) -> PathBuf {
        self.root.join(CONTACTS_DIR)
    }

    /// Path of a contact's key file. `contact_id` must already be validated.
    pub fn contact_path(&self, contact_id: &str) -> PathBuf {
        self.contacts_dir().join(contact_id)
    }

    /// Create the directory layout. Safe to call concurrently and repeatedly.
    pub fn ensure_layout(&self) -> ChannelResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| ChannelError::persistence(&self.root, e))?;

        #[cfg(unix)]
        {
            let mut dir_perms = fs::metadata(&self.root)
                .map_err(|e| ChannelError::persistence(&self.root, e))?
                .permissions();
            dir_perms.set_mode(0o700);
            fs::set_permissions(&self.root, dir_perms)
                .map_err(|e| ChannelError::persistence(&self.root, e))?;
        }

        let contacts = self.contacts_dir();
        fs::create_dir_all(&contacts).map_err(|e| ChannelError::persistence(&contacts, e))?;
        Ok(())
    }

    pub fn contact_exists(&self, contact_id: &str) -> bool {
        self.contact_path(contact_id).is_file()
    }

    /// Read the armored identity key; `None` if no identity has been stored.
    pub fn read_identity(&self) -> ChannelResult<Option<String>> {
        read_optional(&self.identity_path())
    }

    /// Read a contact's armored key; `None` if the contact has no file.
    pub fn read_contact(&self, contact_id: &str) -> ChannelResult<Option<String>> {
        read_optional(&self.contact_path(contact_id))
    }

    pub fn create_identity(&self, armored: &str) -> ChannelResult<WriteOutcome> {
        self.ensure_layout()?;
        create_if_absent(&self.identity_path(), armored.as_bytes(), 0o600)
    }

    pub fn create_contact(&self, contact_id: &str, armored: &str) -> ChannelResult<WriteOutcome> {
        self.ensure_layout()?;
        create_if_absent(&self.contact_path(contact_id), armored.as_bytes(), 0o644)
    }

    /// Contact ids with a key file, sorted.
    ///
    /// Hidden files (in-flight temporary writes) and anything that is not a
    /// regular file are ignored.
    pub fn list_contacts(&self) -> ChannelResult<Vec<String>> {
        let dir = self.contacts_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChannelError::persistence(&dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChannelError::persistence(&dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| ChannelError::persistence(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!("Skipping contact file with non UTF-8 name: {:?}", entry.path());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reject contact ids that cannot safely be used as a file name.
pub fn validate_contact_id(contact_id: &str) -> ChannelResult<()> {
    if contact_id.is_empty() || contact_id.len() > MAX_CONTACT_ID_LEN {
        return Err(ChannelError::InvalidRequest(format!(
            "Contact id must be 1-{} characters",
            MAX_CONTACT_ID_LEN
        )));
    }
    if contact_id.starts_with('.') {
        return Err(ChannelError::InvalidRequest(
            "Contact id must not start with '.'".to_string(),
        ));
    }
    let valid = contact_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '+' | '-'));
    if !valid {
        return Err(ChannelError::InvalidRequest(format!(
            "Contact id contains unsupported characters: {:?}",
            contact_id
        )));
    }
    Ok(())
}

/// Write `bytes` to `path` unless something already exists there.
pub fn create_if_absent(path: &Path, bytes: &[u8], mode: u32) -> ChannelResult<WriteOutcome> {
    let dir = path
        .parent()
        .ok_or_else(|| ChannelError::persistence(path, "path has no parent directory"))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| ChannelError::persistence(dir, e))?;
    set_mode(&temp, mode).map_err(|e| ChannelError::persistence(temp.path(), e))?;
    temp.write_all(bytes)
        .map_err(|e| ChannelError::persistence(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ChannelError::persistence(temp.path(), e))?;

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(WriteOutcome::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            Ok(WriteOutcome::AlreadyExists)
        }
        Err(e) => Err(ChannelError::persistence(path, e.error)),
    }
}

fn read_optional(path: &Path) -> ChannelResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ChannelError::persistence(path, e)),
    }
}

#[cfg(unix)]
fn set_mode(file: &NamedTempFile, mode: u32) -> io::Result<()> {
    let mut perms = file.as_file().metadata()?.permissions();
    perms.set_mode(mode);
    file.as_file().set_permissions(perms)
}

#[cfg(not(unix))]
fn set_mode(_file: &NamedTempFile, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Directory that receives decrypted attachment files.
///
/// Either a configured directory, or a temporary one that lives exactly as
/// long as this value.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: PathBuf,
    _owned: Option<TempDir>,
    #[cfg(test)]
    write_delay: std::time::Duration,
}

impl ScratchSpace {
    pub fn new(configured: Option<PathBuf>) -> ChannelResult<Self> {
        match configured {
            Some(dir) => {
                fs::create_dir_all(&dir).map_err(|e| ChannelError::persistence(&dir, e))?;
                Ok(Self {
                    dir,
                    _owned: None,
                    #[cfg(test)]
                    write_delay: std::time::Duration::ZERO,
                })
            }
            None => {
                let owned = Builder::new()
                    .prefix("attachment-channel-")
                    .tempdir()
                    .map_err(|e| ChannelError::persistence(std::env::temp_dir(), e))?;
                Ok(Self {
                    dir: owned.path().to_path_buf(),
                    _owned: Some(owned),
                    #[cfg(test)]
                    write_delay: std::time::Duration::ZERO,
                })
            }
        }
    }

    /// Stall every write for `delay` once its file is reserved.
    #[cfg(test)]
    pub fn with_write_delay(mut self, delay: std::time::Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh, uniquely named file, fill it and return its path.
    ///
    /// The name is reserved by an exclusive create of the final file itself.
    /// The caller owns the returned file.
    pub fn write_unique(&self, bytes: &[u8]) -> ChannelResult<PathBuf> {
        let mut file = Builder::new()
            .prefix("attachment-")
            .suffix(".bin")
            .tempfile_in(&self.dir)
            .map_err(|e| ChannelError::persistence(&self.dir, e))?;
        set_mode(&file, 0o600).map_err(|e| ChannelError::persistence(file.path(), e))?;
        #[cfg(test)]
        std::thread::sleep(self.write_delay);
        file.write_all(bytes)
            .map_err(|e| ChannelError::persistence(file.path(), e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| ChannelError::persistence(file.path(), e))?;

        let (_file, path) = file
            .keep()
            .map_err(|e| ChannelError::persistence(&self.dir, e.error))?;
        Ok(path)
    }
}
