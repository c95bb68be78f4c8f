//! cairn-secrets: per-device request-signing identity
//!
//! Each device holds one Ed25519 keypair, created on first use and kept in
//! local-only storage. It signs `method:path:timestamp` for every
//! authenticated request and is independent of the account Master Key.
//!
//! Storage backends (selected by `[device] store` in the config):
//!   - `file`:     JSON file, 0600 on unix, replaced atomically
//!   - `keychain`: platform keychain via the `keyring` crate

pub mod device;
pub mod error;
pub mod keychain;
pub mod store;

pub use device::{init_device, verify_request, DeviceIdentity, RequestSignature};
pub use error::{DeviceError, DeviceResult};
pub use keychain::KeychainDeviceStore;
pub use store::{open_store, DeviceStore, FileDeviceStore, MemoryDeviceStore, StoredIdentity};
