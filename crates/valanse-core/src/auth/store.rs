//! Persistent two-slot credential storage.
//!
//! Three backends share the [`CredentialStore`] trait: an in-memory map,
//! a JSON file in the cache directory, and the OS keychain. Each access is
//! serialized by the backend itself; composite sequences are not atomic and
//! are coordinated by the session manager instead.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::StoreBackend;

/// Credential file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Keychain service name
const SERVICE_NAME: &str = "valanse";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

/// The two credential slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Access,
    Refresh,
}

impl Slot {
    /// Persisted key name for this slot
    pub fn key(&self) -> &'static str {
        match self {
            Slot::Access => "access_token",
            Slot::Refresh => "refresh_token",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Key/value storage for the access and refresh credentials.
///
/// An empty stored string reads back as absent.
pub trait CredentialStore: Send + Sync {
    fn get(&self, slot: Slot) -> Result<Option<String>, StoreError>;

    fn set(&self, slot: Slot, value: &str) -> Result<(), StoreError>;

    fn remove(&self, slot: Slot) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError> {
        self.remove(Slot::Access)?;
        self.remove(Slot::Refresh)
    }

    fn contains(&self, slot: Slot) -> Result<bool, StoreError> {
        Ok(self.get(slot)?.is_some())
    }
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn get(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        (**self).get(slot)
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        (**self).set(slot, value)
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        (**self).remove(slot)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open the store selected by configuration.
pub fn open_store(backend: StoreBackend, dir: &Path) -> Arc<dyn CredentialStore> {
    debug!(?backend, dir = %dir.display(), "Opening credential store");
    match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::new(dir.to_path_buf())),
        StoreBackend::Keyring => Arc::new(KeyringStore::new()),
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<Slot, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with the given credentials
    pub fn with(access: Option<&str>, refresh: Option<&str>) -> Self {
        let store = Self::new();
        {
            let mut slots = lock(&store.slots);
            if let Some(a) = access {
                slots.insert(Slot::Access, a.to_string());
            }
            if let Some(r) = refresh {
                slots.insert(Slot::Refresh, r.to_string());
            }
        }
        store
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).values().all(|v| v.is_empty())
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        Ok(non_empty(lock(&self.slots).get(&slot).cloned()))
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        lock(&self.slots).insert(slot, value.to_string());
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        lock(&self.slots).remove(&slot);
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    fn slot_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::Access => &mut self.access_token,
            Slot::Refresh => &mut self.refresh_token,
        }
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Credentials persisted as JSON in the cache directory.
pub struct FileStore {
    cache_dir: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }

    fn load(&self) -> Result<StoredCredentials, StoreError> {
        let path = self.path();
        if !path.exists() {
            return Ok(StoredCredentials::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, stored: &StoredCredentials) -> Result<(), StoreError> {
        let path = self.path();
        if stored.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(stored)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn update(&self, slot: Slot, value: Option<&str>) -> Result<(), StoreError> {
        let _guard = lock(&self.guard);
        let mut stored = self.load()?;
        *stored.slot_mut(slot) = value.map(str::to_string);
        stored.updated_at = Some(Utc::now());
        self.save(&stored)
    }
}

impl CredentialStore for FileStore {
    fn get(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        let _guard = lock(&self.guard);
        let mut stored = self.load()?;
        Ok(non_empty(stored.slot_mut(slot).take()))
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.update(slot, Some(value))
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        self.update(slot, None)
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credentials held in the OS keychain, one entry per slot.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, slot: Slot) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, slot.key())?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        match self.entry(slot)?.get_password() {
            Ok(value) => Ok(non_empty(Some(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.entry(slot)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        match self.entry(slot)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
