//! Platform keychain backend for the device identity.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{DeviceError, DeviceResult};
use crate::store::{DeviceStore, StoredIdentity};

/// Keychain account name the identity is stored under.
pub const DEVICE_IDENTITY_ENTRY: &str = "device-identity";

static KEYCHAIN_WRITE: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone)]
pub struct KeychainDeviceStore {
    service: String,
}

impl KeychainDeviceStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// True if an entry can be created for this service on this platform.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__cairn_probe__").is_ok()
    }

    fn entry(&self) -> DeviceResult<keyring::Entry> {
        keyring::Entry::new(&self.service, DEVICE_IDENTITY_ENTRY)
            .map_err(|e| DeviceError::Store(format!("keychain entry creation: {e}")))
    }

    fn get_secret(&self) -> DeviceResult<Option<SecretString>> {
        match self.entry()?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(DeviceError::Store(format!(
                "keychain get for '{DEVICE_IDENTITY_ENTRY}': {e}"
            ))),
        }
    }
}

impl DeviceStore for KeychainDeviceStore {
    fn load(&self) -> DeviceResult<Option<StoredIdentity>> {
        let Some(secret) = self.get_secret()? else {
            return Ok(None);
        };
        let identity = serde_json::from_str(secret.expose_secret())
            .map_err(|e| DeviceError::CorruptIdentity(format!("keychain entry: {e}")))?;
        Ok(Some(identity))
    }

    fn save(&self, identity: &StoredIdentity) -> DeviceResult<()> {
        let mut json = serde_json::to_string(identity)?;
        let result = self
            .entry()?
            .set_password(&json)
            .map_err(|e| DeviceError::Store(format!("keychain store: {e}")));
        json.zeroize();
        result?;
        tracing::debug!(service = %self.service, "device identity stored in platform keychain");
        Ok(())
    }

    /// The platform keychain has no compare-and-set; this is check then
    /// write, exclusive only within the process.
    fn insert_if_absent(&self, identity: &StoredIdentity) -> DeviceResult<bool> {
        let _guard = KEYCHAIN_WRITE.lock();
        if self.get_secret()?.is_some() {
            return Ok(false);
        }
        self.save(identity)?;
        Ok(true)
    }

    fn clear(&self) -> DeviceResult<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => {
                tracing::debug!(service = %self.service, "device identity removed from keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(DeviceError::Store(format!("keychain delete: {e}"))),
        }
    }

    fn describe(&self) -> String {
        format!("keychain:{}/{DEVICE_IDENTITY_ENTRY}", self.service)
    }
}
