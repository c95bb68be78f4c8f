//! Master key and the envelopes that persist it.
//!
//! The master key itself is random and never stored in cleartext. Two
//! envelope schemes exist:
//!
//! - `password-v2` (canonical): sealed under an Argon2id key derived from the
//!   account password. The only scheme new accounts produce.
//! - `wallet-signature-v1` (legacy): sealed under a key expanded from a wallet
//!   signature. Readable for migration only.

use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use crate::aead::{self, Sealed};
use crate::encoding::base64_encode;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, context, KdfParams};
use crate::KEY_SIZE;

/// The 256-bit account root key.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generate a fresh random master key (account setup).
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            what: "master key",
            got: bytes.len(),
            expected: KEY_SIZE,
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A persisted, encrypted master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scheme")]
pub enum MasterKeyEnvelope {
    #[serde(rename = "password-v2", rename_all = "camelCase")]
    PasswordV2 {
        /// Salt as stored by the backend (base64, or hex from older registrations)
        salt: String,
        kdf: KdfParams,
        sealed: Sealed,
    },
    #[serde(rename = "wallet-signature-v1", rename_all = "camelCase")]
    WalletSignatureV1 { sealed: Sealed },
}

impl MasterKeyEnvelope {
    /// Seal `master` under a key derived from `password` with a fresh salt.
    pub fn wrap_with_password(
        master: &MasterKey,
        password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        let salt = kdf::generate_salt();
        let kek = kdf::derive_key(password, &salt, params)?;
        let sealed = aead::seal(master.as_bytes(), kek.as_slice())?;

        tracing::debug!("master key wrapped with password-v2");
        Ok(MasterKeyEnvelope::PasswordV2 {
            salt: base64_encode(&salt),
            kdf: *params,
            sealed,
        })
    }

    /// Open a `password-v2` envelope.
    pub fn open_with_password(&self, password: &SecretString) -> CryptoResult<MasterKey> {
        match self {
            MasterKeyEnvelope::PasswordV2 { salt, kdf: params, sealed } => {
                let kek = kdf::derive_key_from_encoded_salt(password, salt, params)?;
                open_master(sealed, kek.as_slice())
            }
            MasterKeyEnvelope::WalletSignatureV1 { .. } => Err(legacy_needs_signature()),
        }
    }

    /// Same as [`open_with_password`](Self::open_with_password) but runs the
    /// Argon2id step off the async executor and honours `cancel`.
    pub async fn open_with_password_cancellable(
        &self,
        password: SecretString,
        cancel: CancellationToken,
    ) -> CryptoResult<MasterKey> {
        match self {
            MasterKeyEnvelope::PasswordV2 { salt, kdf: params, sealed } => {
                let salt = kdf::decode_salt(salt)?;
                let kek = kdf::derive_key_cancellable(password, salt, *params, cancel).await?;
                open_master(sealed, kek.as_slice())
            }
            MasterKeyEnvelope::WalletSignatureV1 { .. } => Err(legacy_needs_signature()),
        }
    }

    /// Open a legacy `wallet-signature-v1` envelope.
    pub fn open_with_wallet_signature(&self, signature: &[u8]) -> CryptoResult<MasterKey> {
        match self {
            MasterKeyEnvelope::WalletSignatureV1 { sealed } => {
                let kek = kdf::expand(signature, context::LEGACY_WALLET_KEK)?;
                open_master(sealed, kek.as_slice())
            }
            MasterKeyEnvelope::PasswordV2 { .. } => Err(CryptoError::MalformedEnvelope(
                "password-v2 envelope opened with a wallet signature".into(),
            )),
        }
    }

    /// Re-wrap a legacy envelope under the canonical password scheme.
    pub fn migrate_legacy(
        &self,
        signature: &[u8],
        password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<(MasterKeyEnvelope, MasterKey)> {
        let master = self.open_with_wallet_signature(signature)?;
        let migrated = Self::wrap_with_password(&master, password, params)?;
        tracing::info!("migrated wallet-signature-v1 master key to password-v2");
        Ok((migrated, master))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, MasterKeyEnvelope::WalletSignatureV1 { .. })
    }

    #[cfg(test)]
    pub(crate) fn wrap_with_wallet_signature(
        master: &MasterKey,
        signature: &[u8],
    ) -> CryptoResult<Self> {
        let kek = kdf::expand(signature, context::LEGACY_WALLET_KEK)?;
        Ok(MasterKeyEnvelope::WalletSignatureV1 {
            sealed: aead::seal(master.as_bytes(), kek.as_slice())?,
        })
    }
}

fn open_master(sealed: &Sealed, kek: &[u8]) -> CryptoResult<MasterKey> {
    let mut plaintext = sealed.open(kek).map_err(|e| match e {
        CryptoError::Decryption => CryptoError::MasterKeyMismatch,
        other => other,
    })?;
    let result = MasterKey::from_slice(&plaintext).map_err(|_| CryptoError::CorruptKeyMaterial {
        algorithm: "master-key",
        detail: format!("unwrapped {} bytes, expected {KEY_SIZE}", plaintext.len()),
    });
    plaintext.zeroize();
    result
}

fn legacy_needs_signature() -> CryptoError {
    CryptoError::MalformedEnvelope(
        "wallet-signature-v1 envelope requires the wallet signature; migrate it first".into(),
    )
}
