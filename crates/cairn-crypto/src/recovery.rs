//! Mnemonic recovery path.
//!
//! ```text
//! mnemonic (24 words) ──SHA-256∘SHA-256──▶ RKEK
//! RKEK          seals  Recovery Key (random 32 bytes)
//! Recovery Key  seals  Master Key
//! ```
//! Independent of the password envelope: either path opens the same Master Key.
//! The mnemonic is shown once and never stored. The server keeps only
//! [`verification_hash`], which is domain-separated from the RKEK derivation.

use bip39::Mnemonic;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, Zeroizing};

use crate::aead::{self, Sealed};
use crate::error::{CryptoError, CryptoResult};
use crate::master::MasterKey;
use crate::{KEY_SIZE, NONCE_SIZE};

/// 256 bits of entropy → 24 words.
const MNEMONIC_ENTROPY_BYTES: usize = 32;

const VERIFICATION_DOMAIN: &[u8] = b"cairn/recovery-verification/v1";

/// Double-wrapped Master Key, stored server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryBundle {
    #[serde(with = "crate::encoding::b64")]
    pub encrypted_recovery_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub recovery_key_nonce: [u8; NONCE_SIZE],
    #[serde(with = "crate::encoding::b64")]
    pub encrypted_master_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub master_key_nonce: [u8; NONCE_SIZE],
}

/// Result of [`setup_recovery`]. `mnemonic` goes to the user, the rest to
/// the server.
#[derive(Debug)]
pub struct RecoverySetup {
    pub mnemonic: SecretString,
    pub bundle: RecoveryBundle,
    /// SHA-512 over the domain label and normalized phrase (hex)
    pub verification_hash: String,
}

/// Generate a mnemonic and wrap `master` under it.
pub fn setup_recovery(master: &MasterKey) -> CryptoResult<RecoverySetup> {
    let mut entropy = Zeroizing::new([0u8; MNEMONIC_ENTROPY_BYTES]);
    rand::rngs::OsRng.fill_bytes(entropy.as_mut_slice());

    let mnemonic = Mnemonic::from_entropy(entropy.as_slice())
        .map_err(|e| CryptoError::Kdf(format!("BIP-39 mnemonic generation failed: {e}")))?;
    let phrase = Zeroizing::new(mnemonic.to_string());

    let rkek = recovery_kek(&phrase);
    let recovery_key = Zeroizing::new(aead::generate_key());

    let Sealed {
        ciphertext: encrypted_recovery_key,
        nonce: recovery_key_nonce,
    } = aead::seal(recovery_key.as_slice(), rkek.as_slice())?;
    let Sealed {
        ciphertext: encrypted_master_key,
        nonce: master_key_nonce,
    } = aead::seal(master.as_bytes(), recovery_key.as_slice())?;

    tracing::debug!("recovery bundle created");
    Ok(RecoverySetup {
        verification_hash: verification_digest(&phrase),
        mnemonic: SecretString::from(phrase.as_str()),
        bundle: RecoveryBundle {
            encrypted_recovery_key,
            recovery_key_nonce,
            encrypted_master_key,
            master_key_nonce,
        },
    })
}

/// Open the Master Key with the mnemonic. Every failure is `RecoveryFailed`.
pub fn recover_master_key(
    mnemonic: &SecretString,
    bundle: &RecoveryBundle,
) -> CryptoResult<MasterKey> {
    recover_inner(mnemonic, bundle).map_err(|e| {
        tracing::debug!(cause = %e, "mnemonic recovery failed");
        CryptoError::RecoveryFailed
    })
}

fn recover_inner(mnemonic: &SecretString, bundle: &RecoveryBundle) -> CryptoResult<MasterKey> {
    let phrase = normalize_mnemonic(mnemonic)?;
    let rkek = recovery_kek(&phrase);

    let recovery_key = Zeroizing::new(aead::open(
        &bundle.encrypted_recovery_key,
        rkek.as_slice(),
        &bundle.recovery_key_nonce,
    )?);
    if recovery_key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidLength {
            what: "recovery key",
            got: recovery_key.len(),
            expected: KEY_SIZE,
        });
    }

    let mut master = aead::open(
        &bundle.encrypted_master_key,
        recovery_key.as_slice(),
        &bundle.master_key_nonce,
    )?;
    let result = MasterKey::from_slice(&master);
    master.zeroize();
    result
}

/// One-way digest the server stores to confirm a phrase before attempting
/// recovery. Returns `InvalidEncoding` if the phrase is not a valid mnemonic.
pub fn verification_hash(mnemonic: &SecretString) -> CryptoResult<String> {
    Ok(verification_digest(&normalize_mnemonic(mnemonic)?))
}

/// True if `mnemonic` matches a stored [`verification_hash`].
pub fn verify_mnemonic(mnemonic: &SecretString, expected_hash: &str) -> bool {
    match verification_hash(mnemonic) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected_hash.trim()),
        Err(_) => false,
    }
}

/// Canonical phrase: checksum-validated, lowercase, single-spaced.
fn normalize_mnemonic(mnemonic: &SecretString) -> CryptoResult<Zeroizing<String>> {
    let lowered = Zeroizing::new(
        mnemonic
            .expose_secret()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    let parsed: Mnemonic = lowered
        .parse()
        .map_err(|e| CryptoError::InvalidEncoding(format!("invalid BIP-39 mnemonic: {e}")))?;
    Ok(Zeroizing::new(parsed.to_string()))
}

fn recovery_kek(phrase: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut first = Zeroizing::new([0u8; KEY_SIZE]);
    first.copy_from_slice(&Sha256::digest(phrase.as_bytes()));
    let mut rkek = Zeroizing::new([0u8; KEY_SIZE]);
    rkek.copy_from_slice(&Sha256::digest(first.as_slice()));
    rkek
}

fn verification_digest(phrase: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(VERIFICATION_DOMAIN);
    hasher.update(phrase.as_bytes());
    hex::encode(hasher.finalize())
}
