//! Key derivation: Argon2id for passwords, HKDF-SHA256 for everything else.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::encoding::{decode_flexible_len, Decoded};
use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Salts shorter than this are hashed before reaching Argon2id.
pub const MIN_SALT_LEN: usize = 8;

/// Size of freshly generated password salts.
pub const SALT_LEN: usize = 32;

/// Salt size written by older registrations.
pub const LEGACY_SALT_LEN: usize = 16;

/// HKDF info labels. Each purpose owns exactly one label.
pub mod context {
    pub const FILENAME: &[u8] = b"cairn/filename/v1";
    pub const CONTENT: &[u8] = b"cairn/content/v1";
    pub const DUPLICATE_CHECK: &[u8] = b"cairn/duplicate-check/v1";
    pub const LEGACY_WALLET_KEK: &[u8] = b"cairn/legacy-wallet-kek/v1";

    pub const ALL: &[&[u8]] = &[FILENAME, CONTENT, DUPLICATE_CHECK, LEGACY_WALLET_KEK];
}

/// Argon2id parameters for the password path
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 1)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Generate a random password salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Salts shorter than [`MIN_SALT_LEN`] are expanded with SHA-256 first; they
/// are never handed to Argon2id directly.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let expanded;
    let salt = if salt.len() < MIN_SALT_LEN {
        tracing::debug!(len = salt.len(), "short salt, expanding with SHA-256");
        expanded = Sha256::digest(salt);
        expanded.as_slice()
    } else {
        salt
    };

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| CryptoError::Kdf(format!("Argon2id failed: {e}")))?;

    Ok(key)
}

/// Derive from a salt as stored by the backend, which may be base64 or hex.
pub fn derive_key_from_encoded_salt(
    password: &SecretString,
    encoded_salt: &str,
    params: &KdfParams,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let salt = decode_salt(encoded_salt)?;
    derive_key(password, &salt, params)
}

/// Decode a stored password salt, base64 or hex.
pub fn decode_salt(encoded_salt: &str) -> CryptoResult<Vec<u8>> {
    match decode_flexible_len(encoded_salt, &[LEGACY_SALT_LEN, SALT_LEN])? {
        Decoded::Base64(bytes) => Ok(bytes),
        Decoded::Hex(bytes) => {
            tracing::warn!("password salt stored as hex; re-save to normalize");
            Ok(bytes)
        }
    }
}

/// Run [`derive_key`] on the blocking pool so it never stalls an async
/// caller. Cancelling `cancel` abandons the computation and returns
/// [`CryptoError::Cancelled`].
pub async fn derive_key_cancellable(
    password: SecretString,
    salt: Vec<u8>,
    params: KdfParams,
    cancel: CancellationToken,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let task = tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("password derivation cancelled");
            Err(CryptoError::Cancelled)
        }
        joined = task => joined
            .map_err(|e| CryptoError::Kdf(format!("derivation task failed: {e}")))?,
    }
}

/// HKDF-SHA256 expansion of `secret` under a purpose label into `out`.
pub fn expand_into(secret: &[u8], context: &[u8], out: &mut [u8]) -> CryptoResult<()> {
    expand_salted_into(secret, None, context, out)
}

/// HKDF-SHA256 expansion to a single 256-bit key.
pub fn expand(secret: &[u8], context: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    expand_into(secret, context, okm.as_mut_slice())?;
    Ok(okm)
}

/// HKDF-SHA256 with an explicit per-item salt.
pub fn expand_salted(
    secret: &[u8],
    salt: &[u8],
    context: &[u8],
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    expand_salted_into(secret, Some(salt), context, okm.as_mut_slice())?;
    Ok(okm)
}

fn expand_salted_into(
    secret: &[u8],
    salt: Option<&[u8]>,
    context: &[u8],
    out: &mut [u8],
) -> CryptoResult<()> {
    let hkdf = Hkdf::<Sha256>::new(salt, secret);
    hkdf.expand(context, out)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct-horse");
        let salt = generate_salt();

        let key1 = derive_key(&password, &salt, &test_params()).unwrap();
        let key2 = derive_key(&password, &salt, &test_params()).unwrap();

        assert_eq!(*key1, *key2, "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; 16];

        let key1 = derive_key(&SecretString::from("password-a"), &salt, &test_params()).unwrap();
        let key2 = derive_key(&SecretString::from("password-b"), &salt, &test_params()).unwrap();

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let key1 = derive_key(&password, &[1u8; 16], &test_params()).unwrap();
        let key2 = derive_key(&password, &[2u8; 16], &test_params()).unwrap();

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_short_salt_is_expanded() {
        let password = SecretString::from("pw");

        // Argon2id rejects salts under 8 bytes; these must still work
        let key1 = derive_key(&password, b"abc", &test_params()).unwrap();
        let key2 = derive_key(&password, b"abc", &test_params()).unwrap();
        let key3 = derive_key(&password, b"abd", &test_params()).unwrap();

        assert_eq!(*key1, *key2);
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            mem_cost_kib: 1,
            time_cost: 0,
            parallelism: 1,
        };
        let err = derive_key(&SecretString::from("pw"), &[0u8; 16], &params).unwrap_err();
        assert!(matches!(err, CryptoError::Kdf(_)));
    }

    #[test]
    fn test_encoded_salt_hex_and_base64_agree() {
        let password = SecretString::from("pw");
        // 9 bytes: 18 hex chars, which is never valid padded base64
        let salt = [0xA5u8; 9];
        let b64 = crate::encoding::base64_encode(&salt);
        let hex = hex::encode(salt);

        let k1 = derive_key_from_encoded_salt(&password, &b64, &test_params()).unwrap();
        let k2 = derive_key_from_encoded_salt(&password, &hex, &test_params()).unwrap();
        assert_eq!(*k1, *k2);

        assert!(matches!(
            derive_key_from_encoded_salt(&password, "%%%", &test_params()),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_hex_salt_of_full_length_derives_same_key() {
        let password = SecretString::from("correct-horse");
        for salt in [vec![0x3Cu8; LEGACY_SALT_LEN], generate_salt().to_vec()] {
            let from_b64 = derive_key_from_encoded_salt(
                &password,
                &crate::encoding::base64_encode(&salt),
                &test_params(),
            )
            .unwrap();
            let from_hex =
                derive_key_from_encoded_salt(&password, &hex::encode(&salt), &test_params())
                    .unwrap();
            let direct = derive_key(&password, &salt, &test_params()).unwrap();

            assert_eq!(*from_b64, *direct);
            assert_eq!(*from_hex, *direct);
        }
    }

    #[test]
    fn test_contexts_are_distinct() {
        let unique: HashSet<_> = context::ALL.iter().collect();
        assert_eq!(unique.len(), context::ALL.len());

        let secret = [42u8; KEY_SIZE];
        let keys: HashSet<[u8; KEY_SIZE]> = context::ALL
            .iter()
            .map(|c| *expand(&secret, c).unwrap())
            .collect();
        assert_eq!(keys.len(), context::ALL.len());
    }

    #[test]
    fn test_expand_salted_depends_on_salt() {
        let secret = [7u8; KEY_SIZE];
        let a = expand_salted(&secret, b"salt-a", context::FILENAME).unwrap();
        let b = expand_salted(&secret, b"salt-b", context::FILENAME).unwrap();
        assert_ne!(*a, *b);
    }

    #[tokio::test]
    async fn test_cancellable_completes() {
        let salt = vec![3u8; 16];
        let direct = derive_key(&SecretString::from("pw"), &salt, &test_params()).unwrap();

        let key = derive_key_cancellable(
            SecretString::from("pw"),
            salt,
            test_params(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*key, *direct);
    }

    #[tokio::test]
    async fn test_cancellable_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = derive_key_cancellable(
            SecretString::from("pw"),
            vec![3u8; 16],
            KdfParams::default(),
            cancel,
        )
        .await;

        assert!(matches!(result, Err(CryptoError::Cancelled)));
    }
}
