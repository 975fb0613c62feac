//! The set of keys an incoming attachment may be addressed to.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tokio::sync::RwLock;

/// Who a keyring member belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyOwner {
    /// The local identity.
    Identity(String),
    Contact(String),
}

impl fmt::Display for KeyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(user_id) => write!(f, "identity:{}", user_id),
            Self::Contact(contact_id) => write!(f, "contact:{}", contact_id),
        }
    }
}

/// A cached contact key and the file it was loaded from.
#[derive(Debug, Clone)]
pub struct ContactKey<K> {
    pub contact_id: String,
    pub key: K,
    pub path: PathBuf,
}

struct Members<K> {
    identity: Option<(String, K)>,
    contacts: BTreeMap<String, ContactKey<K>>,
}

/// Identity key plus every contact key, behind a read-mostly lock.
///
/// Decrypt takes a snapshot and releases the lock before doing any
/// cryptography, so registrations never wait on a slow unseal.
pub struct KeyRing<K> {
    members: RwLock<Members<K>>,
}

impl<K: Clone> KeyRing<K> {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Members {
                identity: None,
                contacts: BTreeMap::new(),
            }),
        }
    }

    /// Install the local identity. Only the identity store calls this, once.
    pub async fn set_identity(&self, user_id: &str, key: K) {
        let mut members = self.members.write().await;
        if members.identity.is_some() {
            tracing::warn!("Replacing identity key in keyring for {}", user_id);
        }
        members.identity = Some((user_id.to_string(), key));
    }

    pub async fn identity(&self) -> Option<(String, K)> {
        self.members.read().await.identity.clone()
    }

    /// Insert a contact key unless one is already present.
    ///
    /// Returns `false` when the contact already had an entry; cached contact
    /// keys are never replaced.
    pub async fn insert_contact(&self, contact: ContactKey<K>) -> bool {
        let mut members = self.members.write().await;
        if members.contacts.contains_key(&contact.contact_id) {
            return false;
        }
        members.contacts.insert(contact.contact_id.clone(), contact);
        true
    }

    pub async fn contact(&self, contact_id: &str) -> Option<ContactKey<K>> {
        self.members.read().await.contacts.get(contact_id).cloned()
    }

    pub async fn contains_contact(&self, contact_id: &str) -> bool {
        self.members.read().await.contacts.contains_key(contact_id)
    }

    pub async fn contact_ids(&self) -> Vec<String> {
        self.members.read().await.contacts.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let members = self.members.read().await;
        members.contacts.len() + usize::from(members.identity.is_some())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every member in trial order: the identity first, then contacts by id.
    pub async fn snapshot(&self) -> Vec<(KeyOwner, K)> {
        let members = self.members.read().await;
        let mut snapshot = Vec::with_capacity(members.contacts.len() + 1);
        if let Some((user_id, key)) = &members.identity {
            snapshot.push((KeyOwner::Identity(user_id.clone()), key.clone()));
        }
        for (contact_id, contact) in &members.contacts {
            snapshot.push((KeyOwner::Contact(contact_id.clone()), contact.key.clone()));
        }
        snapshot
    }
}

impl<K: Clone> Default for KeyRing<K> {
    fn default() -> Self {
        Self::new()
    }
}
