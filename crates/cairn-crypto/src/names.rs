//! Filename and content cipher.
//!
//! Each call draws a fresh item salt and derives a one-shot item key:
//! `HKDF(master, salt = item_salt, info = "cairn/filename/v1" | "cairn/content/v1")`.
//! The item key is zeroized as soon as the envelope is sealed or opened.

use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, context};
use crate::master::MasterKey;
use crate::NONCE_SIZE;

pub const ITEM_SALT_LEN: usize = 16;

/// Ciphertext of one filename or document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEnvelope {
    #[serde(with = "crate::encoding::b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "crate::encoding::b64")]
    pub item_salt: Vec<u8>,
}

pub fn encrypt_filename(master: &MasterKey, name: &str) -> CryptoResult<ItemEnvelope> {
    seal_item(master, context::FILENAME, name.as_bytes())
}

pub fn decrypt_filename(master: &MasterKey, envelope: &ItemEnvelope) -> CryptoResult<String> {
    let plaintext = open_item(master, context::FILENAME, envelope)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::MalformedEnvelope("decrypted filename is not UTF-8".into()))
}

pub fn encrypt_content(master: &MasterKey, content: &[u8]) -> CryptoResult<ItemEnvelope> {
    seal_item(master, context::CONTENT, content)
}

pub fn decrypt_content(master: &MasterKey, envelope: &ItemEnvelope) -> CryptoResult<Vec<u8>> {
    open_item(master, context::CONTENT, envelope)
}

/// Encrypt many filenames in parallel. Output order matches input order.
pub fn encrypt_filenames<S>(master: &MasterKey, names: &[S]) -> CryptoResult<Vec<ItemEnvelope>>
where
    S: AsRef<str> + Sync,
{
    names
        .par_iter()
        .map(|name| encrypt_filename(master, name.as_ref()))
        .collect()
}

fn seal_item(master: &MasterKey, purpose: &[u8], plaintext: &[u8]) -> CryptoResult<ItemEnvelope> {
    let mut item_salt = vec![0u8; ITEM_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut item_salt);

    let item_key = kdf::expand_salted(master.as_bytes(), &item_salt, purpose)?;
    let sealed = aead::seal(plaintext, item_key.as_slice())?;

    Ok(ItemEnvelope {
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce,
        item_salt,
    })
}

fn open_item(master: &MasterKey, purpose: &[u8], envelope: &ItemEnvelope) -> CryptoResult<Vec<u8>> {
    if envelope.item_salt.is_empty() {
        return Err(CryptoError::MalformedEnvelope("missing item salt".into()));
    }
    let item_key = kdf::expand_salted(master.as_bytes(), &envelope.item_salt, purpose)?;
    aead::open(&envelope.ciphertext, item_key.as_slice(), &envelope.nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_roundtrip() {
        let master = MasterKey::generate();
        let env = encrypt_filename(&master, "tax-return-2025.pdf").unwrap();
        assert_eq!(decrypt_filename(&master, &env).unwrap(), "tax-return-2025.pdf");
    }

    #[test]
    fn test_unicode_filename() {
        let master = MasterKey::generate();
        let name = "Résumé – 履歴書.docx";
        let env = encrypt_filename(&master, name).unwrap();
        assert_eq!(decrypt_filename(&master, &env).unwrap(), name);
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_call() {
        let master = MasterKey::generate();
        let a = encrypt_filename(&master, "same.txt").unwrap();
        let b = encrypt_filename(&master, "same.txt").unwrap();

        assert_ne!(a.item_salt, b.item_salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let env = encrypt_filename(&MasterKey::generate(), "secret.txt").unwrap();
        assert!(matches!(
            decrypt_filename(&MasterKey::generate(), &env),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_filename_and_content_keys_separated() {
        let master = MasterKey::generate();
        let env = encrypt_content(&master, b"body text").unwrap();

        // Same salt, other purpose label: must not open
        assert!(decrypt_filename(&master, &env).is_err());
        assert_eq!(decrypt_content(&master, &env).unwrap(), b"body text");
    }

    #[test]
    fn test_tampered_salt_fails() {
        let master = MasterKey::generate();
        let mut env = encrypt_content(&master, b"payload bytes here").unwrap();
        env.item_salt[0] ^= 0x01;
        assert!(decrypt_content(&master, &env).is_err());

        env.item_salt.clear();
        assert!(matches!(
            decrypt_content(&master, &env),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_empty_content() {
        let master = MasterKey::generate();
        let env = encrypt_content(&master, b"").unwrap();
        assert!(decrypt_content(&master, &env).unwrap().is_empty());
    }

    #[test]
    fn test_batch_preserves_order() {
        let master = MasterKey::generate();
        let names: Vec<String> = (0..64).map(|i| format!("file-{i:03}.txt")).collect();

        let envelopes = encrypt_filenames(&master, &names).unwrap();
        assert_eq!(envelopes.len(), names.len());
        for (name, env) in names.iter().zip(&envelopes) {
            assert_eq!(&decrypt_filename(&master, env).unwrap(), name);
        }
    }

    #[test]
    fn test_envelope_json_fields() {
        let master = MasterKey::generate();
        let env = encrypt_filename(&master, "a.txt").unwrap();
        let json = serde_json::to_value(&env).unwrap();

        assert!(json["ciphertext"].is_string());
        assert!(json["nonce"].is_string());
        assert!(json["itemSalt"].is_string());

        let back: ItemEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }
}
