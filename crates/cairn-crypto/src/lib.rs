//! cairn-crypto: client-side, zero-knowledge key management for Cairn
//!
//! The server only ever stores ciphertext, digests, public keys and signatures.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit random, session-scoped in memory only)
//!   ├── Password envelope: XChaCha20-Poly1305 under Argon2id(password, salt)
//!   ├── Recovery envelope: sealed under Recovery Key, itself sealed under
//!   │                      RKEK = SHA-256(SHA-256(mnemonic))
//!   ├── Keyring: 4 wrap keys (random, sealed by master key)
//!   │   ├── Ed25519 signing key     ─┐
//!   │   ├── X25519 agreement key     │ each sealed by its own wrap key
//!   │   ├── ML-KEM-768 decaps key    │
//!   │   └── ML-DSA-65 signing key   ─┘
//!   ├── Item keys: HKDF(master, salt=item_salt, info="cairn/{filename,content}/v1")
//!   └── Duplicate-tag keys: HKDF(master, info="cairn/duplicate-check/v1" || parent_ref)
//! ```

pub mod account;
pub mod aead;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod keyring;
pub mod manifest;
pub mod master;
pub mod names;
pub mod recovery;
pub mod session;
pub mod sign;

pub use account::{AccountKeys, NewAccount};
pub use aead::{open, seal, Sealed};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, expand, KdfParams};
pub use keyring::{
    generate_keyring, rotate_master_key, unlock_keyring, Algorithm, KeyringBundle, PublicKeyring,
    UnlockedKeyring, WrappedKeyRecord,
};
pub use manifest::{
    create_manifest, duplicate_tag, verify_manifest, verify_manifest_for, ItemKind, Manifest,
    ManifestSignature, SignedManifest,
};
pub use master::{MasterKey, MasterKeyEnvelope};
pub use names::{
    decrypt_content, decrypt_filename, encrypt_content, encrypt_filename, encrypt_filenames,
    ItemEnvelope,
};
pub use recovery::{
    recover_master_key, setup_recovery, verify_mnemonic, RecoveryBundle, RecoverySetup,
};
pub use session::MasterKeySlot;

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
