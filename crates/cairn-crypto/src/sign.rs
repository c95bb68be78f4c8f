//! Hybrid signatures: Ed25519 + ML-DSA-65.
//!
//! Both signatures must verify for the combined signature to be valid.
//! If either algorithm is broken, the other still protects integrity.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use pqcrypto_mldsa::mldsa65;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as PqPublicKey, SecretKey as PqSecretKey,
};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

pub const ED25519_SECRET_KEY_SIZE: usize = 32;
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Signature pair over one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridSignature {
    pub classical: [u8; ED25519_SIGNATURE_SIZE],
    pub pq: Vec<u8>,
}

/// Load an Ed25519 signing key from its 32-byte seed.
pub fn ed25519_signing_key(secret: &[u8]) -> CryptoResult<SigningKey> {
    let mut seed: [u8; ED25519_SECRET_KEY_SIZE] =
        secret.try_into().map_err(|_| CryptoError::InvalidLength {
            what: "ed25519 secret key",
            got: secret.len(),
            expected: ED25519_SECRET_KEY_SIZE,
        })?;
    let key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(key)
}

pub fn sign_ed25519(secret: &[u8], message: &[u8]) -> CryptoResult<[u8; ED25519_SIGNATURE_SIZE]> {
    Ok(ed25519_signing_key(secret)?.sign(message).to_bytes())
}

/// Returns true if valid, false otherwise (including malformed inputs).
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; ED25519_PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &sig).is_ok()
}

pub fn sign_mldsa(secret: &[u8], message: &[u8]) -> CryptoResult<Vec<u8>> {
    let sk = mldsa65::SecretKey::from_bytes(secret).map_err(|_| CryptoError::InvalidLength {
        what: "ml-dsa-65 secret key",
        got: secret.len(),
        expected: mldsa65::secret_key_bytes(),
    })?;
    Ok(mldsa65::detached_sign(message, &sk).as_bytes().to_vec())
}

/// Returns true if valid, false otherwise (including malformed inputs).
pub fn verify_mldsa(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(pk) = mldsa65::PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = mldsa65::DetachedSignature::from_bytes(signature) else {
        return false;
    };
    mldsa65::verify_detached_signature(&sig, message, &pk).is_ok()
}

/// Sign a message with both Ed25519 and ML-DSA-65.
pub fn sign_hybrid(
    ed25519_secret: &[u8],
    mldsa_secret: &[u8],
    message: &[u8],
) -> CryptoResult<HybridSignature> {
    Ok(HybridSignature {
        classical: sign_ed25519(ed25519_secret, message)?,
        pq: sign_mldsa(mldsa_secret, message)?,
    })
}

/// Verify a hybrid signature. Both halves must be valid.
pub fn verify_hybrid(
    ed25519_public: &[u8],
    mldsa_public: &[u8],
    message: &[u8],
    signature: &HybridSignature,
) -> CryptoResult<()> {
    if !verify_ed25519(ed25519_public, message, &signature.classical) {
        return Err(CryptoError::InvalidSignature);
    }
    if !verify_mldsa(mldsa_public, message, &signature.pq) {
        return Err(CryptoError::InvalidSignature);
    }
    Ok(())
}
