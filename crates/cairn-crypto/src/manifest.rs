//! Dual-signed item manifests and duplicate-detection tags.
//!
//! A manifest carries only the encrypted name, so the server can store and
//! verify it without learning anything about the item. Its canonical byte
//! form is length-prefixed and built field by field:
//!
//! ```text
//! "cairn/manifest/v1"
//! kind        u8        (0 = file, 1 = folder)
//! ciphertext  u32 BE len ‖ bytes
//! nonce       u32 BE len ‖ bytes
//! item_salt   u32 BE len ‖ bytes
//! parent_ref  u32 BE len ‖ UTF-8
//! created_at  u64 BE    (Unix seconds)
//! ```
//!
//! The SHA-512 of those bytes is signed with Ed25519 and with ML-DSA-65.
//! A manifest is trusted only when both signatures verify.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, context};
use crate::keyring::{Algorithm, PublicKeyring, UnlockedKeyring};
use crate::master::MasterKey;
use crate::names::{self, ItemEnvelope};
use crate::sign::{self, HybridSignature, ED25519_SIGNATURE_SIZE};

const CANONICAL_DOMAIN: &[u8] = b"cairn/manifest/v1";

/// Signature suite recorded in every [`ManifestSignature`].
pub const ALGORITHM_VERSION: &str = "ed25519+ml-dsa-65/v1";

pub const MANIFEST_HASH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    fn tag(self) -> u8 {
        match self {
            ItemKind::File => 0,
            ItemKind::Folder => 1,
        }
    }
}

/// Versioned manifest record. Immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum Manifest {
    #[serde(rename = "1", rename_all = "camelCase")]
    V1 {
        kind: ItemKind,
        name: ItemEnvelope,
        parent_ref: String,
        created_at: u64,
    },
}

impl Manifest {
    pub fn kind(&self) -> ItemKind {
        match self {
            Manifest::V1 { kind, .. } => *kind,
        }
    }

    pub fn name(&self) -> &ItemEnvelope {
        match self {
            Manifest::V1 { name, .. } => name,
        }
    }

    pub fn parent_ref(&self) -> &str {
        match self {
            Manifest::V1 { parent_ref, .. } => parent_ref,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            Manifest::V1 { created_at, .. } => *created_at,
        }
    }

    /// The exact bytes that are hashed and signed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Manifest::V1 {
                kind,
                name,
                parent_ref,
                created_at,
            } => {
                let variable = name.ciphertext.len() + parent_ref.len();
                let mut out = Vec::with_capacity(CANONICAL_DOMAIN.len() + 1 + 16 + 64 + variable);
                out.extend_from_slice(CANONICAL_DOMAIN);
                out.push(kind.tag());
                put_field(&mut out, &name.ciphertext);
                put_field(&mut out, &name.nonce);
                put_field(&mut out, &name.item_salt);
                put_field(&mut out, parent_ref.as_bytes());
                out.extend_from_slice(&created_at.to_be_bytes());
                out
            }
        }
    }

    pub fn hash(&self) -> [u8; MANIFEST_HASH_SIZE] {
        hash_canonical(&self.canonical_bytes())
    }
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

fn hash_canonical(bytes: &[u8]) -> [u8; MANIFEST_HASH_SIZE] {
    let mut out = [0u8; MANIFEST_HASH_SIZE];
    out.copy_from_slice(&Sha512::digest(bytes));
    out
}

/// Both signatures over a manifest hash, with the keys that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignature {
    /// SHA-512 of the canonical manifest bytes (hex)
    pub manifest_hash: String,
    pub created_at: u64,
    #[serde(with = "crate::encoding::b64")]
    pub classical_signature: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub classical_public_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub pq_signature: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub pq_public_key: Vec<u8>,
    pub algorithm_version: String,
}

/// Output of [`create_manifest`]: what gets uploaded for a create or rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedManifest {
    pub manifest: Manifest,
    pub signature: ManifestSignature,
    /// HMAC-SHA256 duplicate tag (hex)
    pub duplicate_tag: String,
}

/// Encrypt `name`, build and dual-sign its manifest, and compute the
/// duplicate tag for `parent_ref`.
pub fn create_manifest(
    master: &MasterKey,
    keyring: &UnlockedKeyring,
    name: &str,
    parent_ref: &str,
    kind: ItemKind,
) -> CryptoResult<SignedManifest> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    create_manifest_at(master, keyring, name, parent_ref, kind, now)
}

/// [`create_manifest`] with an explicit creation timestamp.
pub fn create_manifest_at(
    master: &MasterKey,
    keyring: &UnlockedKeyring,
    name: &str,
    parent_ref: &str,
    kind: ItemKind,
    created_at: u64,
) -> CryptoResult<SignedManifest> {
    let manifest = Manifest::V1 {
        kind,
        name: names::encrypt_filename(master, name)?,
        parent_ref: parent_ref.to_string(),
        created_at,
    };
    let signature = sign_manifest(&manifest, keyring)?;
    let duplicate_tag = duplicate_tag(master, name, parent_ref)?;

    tracing::debug!(parent_ref, ?kind, "manifest created");
    Ok(SignedManifest {
        manifest,
        signature,
        duplicate_tag,
    })
}

/// Hash and dual-sign an already-built manifest.
pub fn sign_manifest(
    manifest: &Manifest,
    keyring: &UnlockedKeyring,
) -> CryptoResult<ManifestSignature> {
    let hash = manifest.hash();
    let HybridSignature { classical, pq } = sign::sign_hybrid(
        keyring.secret_key(Algorithm::Ed25519),
        keyring.secret_key(Algorithm::MlDsa65),
        &hash,
    )?;
    let public = keyring.public_keys();

    Ok(ManifestSignature {
        manifest_hash: hex::encode(hash),
        created_at: manifest.created_at(),
        classical_signature: classical.to_vec(),
        classical_public_key: public.ed25519.clone(),
        pq_signature: pq,
        pq_public_key: public.ml_dsa.clone(),
        algorithm_version: ALGORITHM_VERSION.to_string(),
    })
}

/// True only if the hash matches and both signatures verify against the
/// public keys declared in `signature`.
pub fn verify_manifest(manifest: &Manifest, signature: &ManifestSignature) -> bool {
    signature.created_at == manifest.created_at()
        && verify_manifest_bytes(&manifest.canonical_bytes(), signature)
}

/// Verify against canonical manifest bytes as received.
pub fn verify_manifest_bytes(canonical: &[u8], signature: &ManifestSignature) -> bool {
    if signature.algorithm_version != ALGORITHM_VERSION {
        tracing::debug!(version = %signature.algorithm_version, "unknown manifest signature suite");
        return false;
    }

    let hash = hash_canonical(canonical);
    match hex::decode(&signature.manifest_hash) {
        Ok(declared) if declared == hash => {}
        _ => return false,
    }

    let Ok(classical) =
        <[u8; ED25519_SIGNATURE_SIZE]>::try_from(signature.classical_signature.as_slice())
    else {
        return false;
    };
    let hybrid = HybridSignature {
        classical,
        pq: signature.pq_signature.clone(),
    };
    sign::verify_hybrid(
        &signature.classical_public_key,
        &signature.pq_public_key,
        &hash,
        &hybrid,
    )
    .is_ok()
}

/// [`verify_manifest`], additionally requiring the signing keys to be the
/// account's own.
pub fn verify_manifest_for(
    manifest: &Manifest,
    signature: &ManifestSignature,
    owner: &PublicKeyring,
) -> bool {
    signature.classical_public_key == owner.ed25519
        && signature.pq_public_key == owner.ml_dsa
        && verify_manifest(manifest, signature)
}

/// Keyed tag over the normalized name, scoped to one parent container.
///
/// Names are NFKC-normalized and lowercased, so `Report.PDF` and
/// `report.pdf` collide. Output is lowercase hex.
pub fn duplicate_tag(master: &MasterKey, name: &str, parent_ref: &str) -> CryptoResult<String> {
    let mut info = Vec::with_capacity(context::DUPLICATE_CHECK.len() + parent_ref.len());
    info.extend_from_slice(context::DUPLICATE_CHECK);
    info.extend_from_slice(parent_ref.as_bytes());
    let scope_key = kdf::expand(master.as_bytes(), &info)?;

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(scope_key.as_slice())
        .map_err(|e| CryptoError::Kdf(format!("HMAC key: {e}")))?;
    mac.update(normalize_name(name).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn normalize_name(name: &str) -> String {
    name.nfkc().collect::<String>().to_lowercase()
}
