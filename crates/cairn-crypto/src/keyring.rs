//! Hybrid keypair vault.
//!
//! Four keypairs per account, each private key double-wrapped:
//! ```text
//! private key ──seal──▶ encryptedPrivateKey   (under a random per-key wrap key)
//! wrap key    ──seal──▶ encryptionKey         (under the master key)
//! ```
//! Rotating the master key only re-seals the four 32-byte wrap keys.

use ed25519_dalek::SigningKey;
use pqcrypto_mldsa::mldsa65;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{PublicKey as _, SecretKey as _};
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::aead::{self, Sealed};
use crate::error::{CryptoError, CryptoResult};
use crate::master::MasterKey;
use crate::sign::ed25519_signing_key;
use crate::{KEY_SIZE, NONCE_SIZE};

pub const KEYRING_VERSION: u32 = 1;

/// The four algorithm families held by a keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Ed25519,
    X25519,
    MlKem768,
    MlDsa65,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Ed25519,
        Algorithm::X25519,
        Algorithm::MlKem768,
        Algorithm::MlDsa65,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "ed25519",
            Algorithm::X25519 => "x25519",
            Algorithm::MlKem768 => "ml-kem-768",
            Algorithm::MlDsa65 => "ml-dsa-65",
        }
    }

    pub fn secret_key_len(self) -> usize {
        match self {
            Algorithm::Ed25519 | Algorithm::X25519 => 32,
            Algorithm::MlKem768 => mlkem768::secret_key_bytes(),
            Algorithm::MlDsa65 => mldsa65::secret_key_bytes(),
        }
    }

    pub fn public_key_len(self) -> usize {
        match self {
            Algorithm::Ed25519 | Algorithm::X25519 => 32,
            Algorithm::MlKem768 => mlkem768::public_key_bytes(),
            Algorithm::MlDsa65 => mldsa65::public_key_bytes(),
        }
    }

    fn generate(self) -> (Vec<u8>, Zeroizing<Vec<u8>>) {
        match self {
            Algorithm::Ed25519 => {
                let sk = SigningKey::generate(&mut OsRng);
                (
                    sk.verifying_key().to_bytes().to_vec(),
                    Zeroizing::new(sk.to_bytes().to_vec()),
                )
            }
            Algorithm::X25519 => {
                let sk = StaticSecret::random_from_rng(OsRng);
                (
                    X25519PublicKey::from(&sk).to_bytes().to_vec(),
                    Zeroizing::new(sk.to_bytes().to_vec()),
                )
            }
            Algorithm::MlKem768 => {
                let (pk, sk) = mlkem768::keypair();
                (pk.as_bytes().to_vec(), Zeroizing::new(sk.as_bytes().to_vec()))
            }
            Algorithm::MlDsa65 => {
                let (pk, sk) = mldsa65::keypair();
                (pk.as_bytes().to_vec(), Zeroizing::new(sk.as_bytes().to_vec()))
            }
        }
    }

    /// Public key recomputed from the secret, where the algorithm allows it.
    fn public_from_secret(self, secret: &[u8]) -> Option<Vec<u8>> {
        match self {
            Algorithm::Ed25519 => ed25519_signing_key(secret)
                .ok()
                .map(|sk| sk.verifying_key().to_bytes().to_vec()),
            Algorithm::X25519 => {
                let bytes: [u8; 32] = secret.try_into().ok()?;
                let sk = StaticSecret::from(bytes);
                Some(X25519PublicKey::from(&sk).to_bytes().to_vec())
            }
            Algorithm::MlKem768 | Algorithm::MlDsa65 => None,
        }
    }
}

/// One algorithm family's public key and double-wrapped private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKeyRecord {
    #[serde(with = "crate::encoding::b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub private_key_nonce: [u8; NONCE_SIZE],
    /// The per-key wrap key, sealed under the master key
    #[serde(with = "crate::encoding::b64")]
    pub encryption_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub encryption_nonce: [u8; NONCE_SIZE],
}

/// All four wrapped keypairs of an account, as stored server-side.
///
/// Fields are optional because a half-finished registration can leave any of
/// them absent; [`unlock_keyring`] reports that as `IncompleteKeyring`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringBundle {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ed25519: Option<WrappedKeyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x25519: Option<WrappedKeyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_kem: Option<WrappedKeyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_dsa: Option<WrappedKeyRecord>,
}

impl KeyringBundle {
    pub fn record(&self, algorithm: Algorithm) -> Option<&WrappedKeyRecord> {
        match algorithm {
            Algorithm::Ed25519 => self.ed25519.as_ref(),
            Algorithm::X25519 => self.x25519.as_ref(),
            Algorithm::MlKem768 => self.ml_kem.as_ref(),
            Algorithm::MlDsa65 => self.ml_dsa.as_ref(),
        }
    }

    fn record_mut(&mut self, algorithm: Algorithm) -> &mut Option<WrappedKeyRecord> {
        match algorithm {
            Algorithm::Ed25519 => &mut self.ed25519,
            Algorithm::X25519 => &mut self.x25519,
            Algorithm::MlKem768 => &mut self.ml_kem,
            Algorithm::MlDsa65 => &mut self.ml_dsa,
        }
    }

    /// Every record present with non-empty fields, in [`Algorithm::ALL`] order.
    fn complete_records(&self) -> CryptoResult<[&WrappedKeyRecord; 4]> {
        let missing: Vec<&str> = Algorithm::ALL
            .iter()
            .filter(|alg| {
                self.record(**alg).map_or(true, |r| {
                    r.public_key.is_empty()
                        || r.encrypted_private_key.is_empty()
                        || r.encryption_key.is_empty()
                })
            })
            .map(|alg| alg.name())
            .collect();

        match (
            self.ed25519.as_ref(),
            self.x25519.as_ref(),
            self.ml_kem.as_ref(),
            self.ml_dsa.as_ref(),
        ) {
            (Some(ed), Some(x), Some(kem), Some(dsa)) if missing.is_empty() => {
                Ok([ed, x, kem, dsa])
            }
            _ => Err(CryptoError::IncompleteKeyring(missing.join(", "))),
        }
    }

    /// Public half of the keyring. Fails if any record is missing.
    pub fn public_keys(&self) -> CryptoResult<PublicKeyring> {
        let [ed, x, kem, dsa] = self.complete_records()?;
        Ok(PublicKeyring {
            ed25519: ed.public_key.clone(),
            x25519: x.public_key.clone(),
            ml_kem: kem.public_key.clone(),
            ml_dsa: dsa.public_key.clone(),
        })
    }
}

/// Public keys of an account, safe to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyring {
    #[serde(with = "crate::encoding::b64")]
    pub ed25519: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub x25519: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub ml_kem: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub ml_dsa: Vec<u8>,
}

/// Plaintext private keys, alive only while an operation needs them.
pub struct UnlockedKeyring {
    ed25519: Zeroizing<Vec<u8>>,
    x25519: Zeroizing<Vec<u8>>,
    ml_kem: Zeroizing<Vec<u8>>,
    ml_dsa: Zeroizing<Vec<u8>>,
    public: PublicKeyring,
}

impl UnlockedKeyring {
    pub fn secret_key(&self, algorithm: Algorithm) -> &[u8] {
        match algorithm {
            Algorithm::Ed25519 => &self.ed25519,
            Algorithm::X25519 => &self.x25519,
            Algorithm::MlKem768 => &self.ml_kem,
            Algorithm::MlDsa65 => &self.ml_dsa,
        }
    }

    pub fn public_keys(&self) -> &PublicKeyring {
        &self.public
    }

    pub fn ed25519_signing_key(&self) -> CryptoResult<SigningKey> {
        ed25519_signing_key(&self.ed25519)
    }

    pub fn x25519_secret(&self) -> CryptoResult<StaticSecret> {
        let bytes: [u8; 32] =
            self.x25519
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    what: "x25519 secret key",
                    got: self.x25519.len(),
                    expected: 32,
                })?;
        Ok(StaticSecret::from(bytes))
    }
}

impl std::fmt::Debug for UnlockedKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKeyring")
            .field("secret_keys", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// Generate the four keypairs and wrap each private key under the master key.
pub fn generate_keyring(master: &MasterKey) -> CryptoResult<KeyringBundle> {
    let ((ed, x), (kem, dsa)) = rayon::join(
        || {
            rayon::join(
                || wrap_new_keypair(master, Algorithm::Ed25519),
                || wrap_new_keypair(master, Algorithm::X25519),
            )
        },
        || {
            rayon::join(
                || wrap_new_keypair(master, Algorithm::MlKem768),
                || wrap_new_keypair(master, Algorithm::MlDsa65),
            )
        },
    );

    tracing::debug!("generated hybrid keyring");
    Ok(KeyringBundle {
        version: KEYRING_VERSION,
        ed25519: Some(ed?),
        x25519: Some(x?),
        ml_kem: Some(kem?),
        ml_dsa: Some(dsa?),
    })
}

/// Unwrap all four private keys and validate their shapes.
///
/// - missing records → `IncompleteKeyring`
/// - no wrap key opens under `master` → `MasterKeyMismatch`
/// - some wrap keys open but not all, or anything wrong after a wrap key
///   opened → `CorruptKeyMaterial`
pub fn unlock_keyring(bundle: &KeyringBundle, master: &MasterKey) -> CryptoResult<UnlockedKeyring> {
    let [ed, x, kem, dsa] = bundle.complete_records()?;

    let ((ed, x), (kem, dsa)) = rayon::join(
        || {
            rayon::join(
                || unwrap_record(master, Algorithm::Ed25519, ed),
                || unwrap_record(master, Algorithm::X25519, x),
            )
        },
        || {
            rayon::join(
                || unwrap_record(master, Algorithm::MlKem768, kem),
                || unwrap_record(master, Algorithm::MlDsa65, dsa),
            )
        },
    );

    // A wrong master key fails every wrap key. If any wrap key opened, the
    // master key is right and a wrap key that did not is corrupt.
    if [&ed, &x, &kem, &dsa]
        .into_iter()
        .all(|r| matches!(r, Err(CryptoError::MasterKeyMismatch)))
    {
        return Err(CryptoError::MasterKeyMismatch);
    }
    let checked = |alg: Algorithm, r: CryptoResult<Zeroizing<Vec<u8>>>| {
        r.map_err(|e| match e {
            CryptoError::MasterKeyMismatch => {
                corrupt(alg, "wrap key fails under a master key that opens the rest".into())
            }
            other => other,
        })
    };

    let unlocked = UnlockedKeyring {
        ed25519: checked(Algorithm::Ed25519, ed)?,
        x25519: checked(Algorithm::X25519, x)?,
        ml_kem: checked(Algorithm::MlKem768, kem)?,
        ml_dsa: checked(Algorithm::MlDsa65, dsa)?,
        public: bundle.public_keys()?,
    };
    tracing::debug!("unlocked hybrid keyring");
    Ok(unlocked)
}

/// Re-seal the four wrap keys under `new_master`. Private-key ciphertexts are
/// carried over untouched.
pub fn rotate_master_key(
    bundle: &KeyringBundle,
    old_master: &MasterKey,
    new_master: &MasterKey,
) -> CryptoResult<KeyringBundle> {
    bundle.complete_records()?;

    let mut rotated = bundle.clone();
    for alg in Algorithm::ALL {
        if let Some(record) = rotated.record_mut(alg).as_mut() {
            let wrap_key = open_wrap_key(old_master, alg, record)?;
            let resealed = aead::seal(wrap_key.as_slice(), new_master.as_bytes())?;
            record.encryption_key = resealed.ciphertext;
            record.encryption_nonce = resealed.nonce;
        }
    }

    tracing::info!("keyring re-wrapped under rotated master key");
    Ok(rotated)
}

fn wrap_new_keypair(master: &MasterKey, algorithm: Algorithm) -> CryptoResult<WrappedKeyRecord> {
    let (public_key, secret) = algorithm.generate();
    let wrap_key = Zeroizing::new(aead::generate_key());

    let Sealed {
        ciphertext: encrypted_private_key,
        nonce: private_key_nonce,
    } = aead::seal(&secret, wrap_key.as_slice())?;
    let Sealed {
        ciphertext: encryption_key,
        nonce: encryption_nonce,
    } = aead::seal(wrap_key.as_slice(), master.as_bytes())?;

    Ok(WrappedKeyRecord {
        public_key,
        encrypted_private_key,
        private_key_nonce,
        encryption_key,
        encryption_nonce,
    })
}

fn open_wrap_key(
    master: &MasterKey,
    algorithm: Algorithm,
    record: &WrappedKeyRecord,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let wrap_key = aead::open(
        &record.encryption_key,
        master.as_bytes(),
        &record.encryption_nonce,
    )
    .map(Zeroizing::new)
    .map_err(|e| match e {
        CryptoError::Decryption => CryptoError::MasterKeyMismatch,
        other => corrupt(algorithm, format!("wrap key: {other}")),
    })?;

    if wrap_key.len() != KEY_SIZE {
        return Err(corrupt(
            algorithm,
            format!("wrap key is {} bytes, expected {KEY_SIZE}", wrap_key.len()),
        ));
    }
    Ok(wrap_key)
}

fn unwrap_record(
    master: &MasterKey,
    algorithm: Algorithm,
    record: &WrappedKeyRecord,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let wrap_key = open_wrap_key(master, algorithm, record)?;

    let secret = aead::open(
        &record.encrypted_private_key,
        wrap_key.as_slice(),
        &record.private_key_nonce,
    )
    .map(Zeroizing::new)
    .map_err(|e| corrupt(algorithm, format!("private key: {e}")))?;

    let expected = algorithm.secret_key_len();
    if secret.len() != expected {
        return Err(corrupt(
            algorithm,
            format!("private key is {} bytes, expected {expected}", secret.len()),
        ));
    }
    if record.public_key.len() != algorithm.public_key_len() {
        return Err(corrupt(
            algorithm,
            format!(
                "public key is {} bytes, expected {}",
                record.public_key.len(),
                algorithm.public_key_len()
            ),
        ));
    }
    if let Some(derived) = algorithm.public_from_secret(&secret) {
        if derived != record.public_key {
            return Err(corrupt(algorithm, "public key does not match private key".into()));
        }
    }

    Ok(secret)
}

fn corrupt(algorithm: Algorithm, detail: String) -> CryptoError {
    tracing::error!(algorithm = algorithm.name(), %detail, "corrupt key material");
    CryptoError::CorruptKeyMaterial {
        algorithm: algorithm.name(),
        detail,
    }
}
