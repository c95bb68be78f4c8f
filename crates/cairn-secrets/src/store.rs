//! Local persistence for the device identity.

use std::io::Write;
use std::path::{Path, PathBuf};

use cairn_core::config::{expand_tilde, DeviceConfig, DeviceStoreKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DeviceError, DeviceResult};
use crate::keychain::KeychainDeviceStore;

pub const STORED_IDENTITY_VERSION: u32 = 1;

/// On-disk form of a device identity. Never leaves the device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub version: u32,
    pub device_id: String,
    pub device_name: String,
    /// Ed25519 seed (hex)
    pub secret_key: String,
    /// Ed25519 public key (hex)
    pub public_key: String,
    pub created_at: u64,
}

impl std::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("secret_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Where a device identity lives between sessions.
pub trait DeviceStore: Send + Sync {
    fn load(&self) -> DeviceResult<Option<StoredIdentity>>;
    fn save(&self, identity: &StoredIdentity) -> DeviceResult<()>;
    /// Persist `identity` only if the store is empty. Returns `false` when
    /// another identity is already there; nothing is written in that case.
    fn insert_if_absent(&self, identity: &StoredIdentity) -> DeviceResult<bool>;
    /// Remove the identity. Clearing an empty store is not an error.
    fn clear(&self) -> DeviceResult<()>;
    /// Human-readable location, for status output.
    fn describe(&self) -> String;
}

/// Build the store selected in config.
pub fn open_store(config: &DeviceConfig) -> Box<dyn DeviceStore> {
    match config.store {
        DeviceStoreKind::File => {
            Box::new(FileDeviceStore::new(expand_tilde(&config.identity_path)))
        }
        DeviceStoreKind::Keychain => Box::new(KeychainDeviceStore::new(&config.keychain_service)),
    }
}

/// JSON file store. Written to a private temp file in the same directory,
/// then moved into place.
#[derive(Debug, Clone)]
pub struct FileDeviceStore {
    path: PathBuf,
}

impl FileDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize into a fresh 0600 temp file next to the target. The temp
    /// file is removed if it is dropped without being persisted.
    fn stage(&self, identity: &StoredIdentity) -> DeviceResult<NamedTempFile> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut json = serde_json::to_string_pretty(identity)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        let written = tmp
            .write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all());
        json.zeroize();
        written?;
        Ok(tmp)
    }
}

impl DeviceStore for FileDeviceStore {
    fn load(&self) -> DeviceResult<Option<StoredIdentity>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let identity = serde_json::from_str(&content).map_err(|e| {
            DeviceError::CorruptIdentity(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Some(identity))
    }

    fn save(&self, identity: &StoredIdentity) -> DeviceResult<()> {
        self.stage(identity)?
            .persist(&self.path)
            .map_err(|e| DeviceError::Io(e.error))?;
        tracing::debug!(path = %self.path.display(), "device identity saved");
        Ok(())
    }

    fn insert_if_absent(&self, identity: &StoredIdentity) -> DeviceResult<bool> {
        match self.stage(identity)?.persist_noclobber(&self.path) {
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "device identity created");
                Ok(true)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(DeviceError::Io(e.error)),
        }
    }

    fn clear(&self) -> DeviceResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// In-process store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    slot: Mutex<Option<StoredIdentity>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> DeviceResult<Option<StoredIdentity>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, identity: &StoredIdentity) -> DeviceResult<()> {
        *self.slot.lock() = Some(identity.clone());
        Ok(())
    }

    fn insert_if_absent(&self, identity: &StoredIdentity) -> DeviceResult<bool> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(identity.clone());
        Ok(true)
    }

    fn clear(&self) -> DeviceResult<()> {
        self.slot.lock().take();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
