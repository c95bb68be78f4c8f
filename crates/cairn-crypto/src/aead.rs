//! XChaCha20-Poly1305 envelope: the substrate every other component seals with.
//!
//! Sealed plaintext framing:
//! ```text
//! raw:    [0x00][plaintext ...]
//! padded: [0x01][len: u8][plaintext: len bytes][zero fill up to 16 bytes]
//! ```
//! Plaintexts shorter than [`PAD_BLOCK`] are always padded. Whether to unpad
//! is decided by the authenticated frame tag, never by the decrypted length.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Plaintexts shorter than this are padded up to it.
pub const PAD_BLOCK: usize = 16;

const FRAME_RAW: u8 = 0x00;
const FRAME_PADDED: u8 = 0x01;

/// Shortest ciphertext `open` will attempt: tag + frame byte.
pub const MIN_CIPHERTEXT_LEN: usize = TAG_SIZE + 1;

/// Sealed size of any padded plaintext: frame tag + length byte + block + tag.
pub const PADDED_CIPHERTEXT_LEN: usize = 2 + PAD_BLOCK + TAG_SIZE;

/// Ciphertext plus the random nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sealed {
    #[serde(with = "crate::encoding::b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub nonce: [u8; NONCE_SIZE],
}

/// Generate a random 256-bit symmetric key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 192-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` under a 32-byte key with a fresh random nonce.
pub fn seal(plaintext: &[u8], key: &[u8]) -> CryptoResult<Sealed> {
    seal_with_aad(plaintext, key, &[])
}

/// Open a sealed payload. Any tag mismatch is [`CryptoError::Decryption`].
pub fn open(ciphertext: &[u8], key: &[u8], nonce: &[u8]) -> CryptoResult<Vec<u8>> {
    open_with_aad(ciphertext, key, nonce, &[])
}

/// Seal with additional authenticated data bound into the tag.
pub fn seal_with_aad(plaintext: &[u8], key: &[u8], aad: &[u8]) -> CryptoResult<Sealed> {
    let cipher = cipher_for(key)?;
    let nonce = generate_nonce();

    let mut framed = frame(plaintext);
    let result = cipher.encrypt(
        XNonce::from_slice(&nonce),
        Payload {
            msg: &framed,
            aad,
        },
    );
    framed.zeroize();

    let ciphertext = result.map_err(|e| CryptoError::MalformedEnvelope(format!("seal: {e}")))?;
    Ok(Sealed { ciphertext, nonce })
}

/// Open with additional authenticated data.
pub fn open_with_aad(
    ciphertext: &[u8],
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidLength {
            what: "nonce",
            got: nonce.len(),
            expected: NONCE_SIZE,
        });
    }
    if ciphertext.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::Truncated {
            len: ciphertext.len(),
            min: MIN_CIPHERTEXT_LEN,
        });
    }
    let cipher = cipher_for(key)?;

    let mut framed = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)?;

    let result = unframe(&framed);
    framed.zeroize();
    result
}

impl Sealed {
    pub fn open(&self, key: &[u8]) -> CryptoResult<Vec<u8>> {
        open(&self.ciphertext, key, &self.nonce)
    }
}

fn cipher_for(key: &[u8]) -> CryptoResult<XChaCha20Poly1305> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidLength {
            what: "key",
            got: key.len(),
            expected: KEY_SIZE,
        });
    }
    Ok(XChaCha20Poly1305::new(Key::from_slice(key)))
}

fn frame(plaintext: &[u8]) -> Vec<u8> {
    if plaintext.len() < PAD_BLOCK {
        let mut out = vec![0u8; 2 + PAD_BLOCK];
        out[0] = FRAME_PADDED;
        // len < 16, fits a byte
        out[1] = plaintext.len() as u8;
        out[2..2 + plaintext.len()].copy_from_slice(plaintext);
        out
    } else {
        let mut out = Vec::with_capacity(1 + plaintext.len());
        out.push(FRAME_RAW);
        out.extend_from_slice(plaintext);
        out
    }
}

fn unframe(framed: &[u8]) -> CryptoResult<Vec<u8>> {
    match framed.split_first() {
        Some((&FRAME_RAW, body)) => Ok(body.to_vec()),
        Some((&FRAME_PADDED, body)) => {
            if body.len() != 1 + PAD_BLOCK {
                return Err(CryptoError::MalformedEnvelope(format!(
                    "padded body is {} bytes (expected {})",
                    body.len(),
                    1 + PAD_BLOCK
                )));
            }
            let len = body[0] as usize;
            if len >= PAD_BLOCK {
                return Err(CryptoError::MalformedEnvelope(format!(
                    "padded length {len} out of range"
                )));
            }
            Ok(body[1..1 + len].to_vec())
        }
        Some((tag, _)) => Err(CryptoError::MalformedEnvelope(format!(
            "unknown frame tag {tag:#04x}"
        ))),
        None => Err(CryptoError::MalformedEnvelope("empty frame".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_key();
        let plaintext = b"hello, encrypted world!";

        let sealed = seal(plaintext, &key).unwrap();
        let opened = open(&sealed.ciphertext, &key, &sealed.nonce).unwrap();

        assert_eq!(&opened, plaintext);
    }

    #[test]
    fn test_short_payload_is_padded() {
        let key = generate_key();
        let sealed = seal(b"abcde", &key).unwrap();

        assert_eq!(sealed.ciphertext.len(), PADDED_CIPHERTEXT_LEN);
        assert_eq!(sealed.open(&key).unwrap(), b"abcde");
    }

    #[test]
    fn test_empty_payload() {
        let key = generate_key();
        let sealed = seal(b"", &key).unwrap();

        assert_eq!(sealed.ciphertext.len(), PADDED_CIPHERTEXT_LEN);
        assert_eq!(sealed.open(&key).unwrap(), b"");
    }

    #[test]
    fn test_seventeen_byte_payload_not_unpadded() {
        // 17 bytes whose first byte looks like a plausible length prefix
        let key = generate_key();
        let mut plaintext = vec![5u8];
        plaintext.extend_from_slice(&[0xEE; 16]);

        let sealed = seal(&plaintext, &key).unwrap();
        assert_eq!(sealed.open(&key).unwrap(), plaintext);
    }

    #[test]
    fn test_block_sized_payload_is_raw() {
        let key = generate_key();
        let plaintext = [0x42u8; PAD_BLOCK];
        let sealed = seal(&plaintext, &key).unwrap();

        assert_eq!(sealed.ciphertext.len(), 1 + PAD_BLOCK + TAG_SIZE);
        assert_eq!(sealed.open(&key).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(b"secret data", &generate_key()).unwrap();
        let err = sealed.open(&generate_key()).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption));
    }

    #[test]
    fn test_truncated_rejected_before_decrypt() {
        let key = generate_key();
        let err = open(&[0u8; MIN_CIPHERTEXT_LEN - 1], &key, &[0u8; NONCE_SIZE]).unwrap_err();
        assert!(matches!(err, CryptoError::Truncated { len: 16, min: 17 }));
    }

    #[test]
    fn test_bad_key_and_nonce_lengths() {
        assert!(matches!(
            seal(b"x", &[0u8; 16]),
            Err(CryptoError::InvalidLength { what: "key", got: 16, expected: 32 })
        ));

        let key = generate_key();
        let sealed = seal(b"payload", &key).unwrap();
        assert!(matches!(
            open(&sealed.ciphertext, &key, &sealed.nonce[..12]),
            Err(CryptoError::InvalidLength { what: "nonce", got: 12, expected: 24 })
        ));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = generate_key();
        let sealed = seal_with_aad(b"bound payload", &key, b"context-a").unwrap();

        assert!(open_with_aad(&sealed.ciphertext, &key, &sealed.nonce, b"context-a").is_ok());
        assert!(matches!(
            open_with_aad(&sealed.ciphertext, &key, &sealed.nonce, b"context-b"),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = generate_key();
        let a = seal(b"same plaintext here", &key).unwrap();
        let b = seal(b"same plaintext here", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_unframe_rejects_unknown_tag() {
        assert!(matches!(
            unframe(&[0x7f, 1, 2, 3]),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            unframe(&[FRAME_PADDED, 3, 1, 2]),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_sealed_json_shape() {
        let key = generate_key();
        let sealed = seal(b"json me", &key).unwrap();
        let json = serde_json::to_value(&sealed).unwrap();

        assert!(json["ciphertext"].is_string());
        assert!(json["nonce"].is_string());

        let back: Sealed = serde_json::from_value(json).unwrap();
        assert_eq!(back, sealed);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_open_inverts_seal(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = generate_key();
            let sealed = seal(&plaintext, &key).unwrap();
            prop_assert_eq!(sealed.open(&key).unwrap(), plaintext);
        }

        #[test]
        fn prop_single_bit_flip_fails(
            plaintext in proptest::collection::vec(any::<u8>(), 0..128),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = generate_key();
            let mut sealed = seal(&plaintext, &key).unwrap();
            let i = pos.index(sealed.ciphertext.len());
            sealed.ciphertext[i] ^= 1 << bit;

            prop_assert!(matches!(sealed.open(&key), Err(CryptoError::Decryption)));
        }
    }
}
