//! Wire encodings for byte fields.
//!
//! Everything we write is standard base64. Salts coming back from older
//! registrations may be hex, so [`decode_flexible`] accepts either.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

/// Which encoding a flexible decode succeeded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Base64(Vec<u8>),
    Hex(Vec<u8>),
}

impl Decoded {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Decoded::Base64(b) | Decoded::Hex(b) => b,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Decoded::Base64(b) | Decoded::Hex(b) => b,
        }
    }
}

pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| CryptoError::InvalidEncoding(format!("base64 decode: {e}")))
}

/// Decode a string that may be base64 or hex. Base64 is tried first.
pub fn decode_flexible(s: &str) -> CryptoResult<Decoded> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::InvalidEncoding("empty string".into()));
    }
    if let Ok(bytes) = STANDARD.decode(trimmed) {
        return Ok(Decoded::Base64(bytes));
    }
    match hex::decode(trimmed) {
        Ok(bytes) => {
            tracing::debug!("value decoded via hex fallback");
            Ok(Decoded::Hex(bytes))
        }
        Err(e) => Err(CryptoError::InvalidEncoding(format!(
            "neither base64 nor hex: {e}"
        ))),
    }
}

/// [`decode_flexible`] for values whose decoded length is known.
///
/// Even-length hex is also valid base64 whenever its length is a multiple
/// of four, so a base64 result of an unexpected length falls through to hex
/// when hex yields one of the `expected` lengths.
pub fn decode_flexible_len(s: &str, expected: &[usize]) -> CryptoResult<Decoded> {
    let trimmed = s.trim();
    if let Ok(bytes) = STANDARD.decode(trimmed) {
        if expected.contains(&bytes.len()) {
            return Ok(Decoded::Base64(bytes));
        }
    }
    if let Ok(bytes) = hex::decode(trimmed) {
        if expected.contains(&bytes.len()) {
            tracing::debug!(len = bytes.len(), "value decoded via hex fallback");
            return Ok(Decoded::Hex(bytes));
        }
    }
    decode_flexible(trimmed)
}

/// Fixed-size variant of [`base64_decode`].
pub fn base64_decode_array<const N: usize>(s: &str) -> CryptoResult<[u8; N]> {
    let bytes = base64_decode(s)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::InvalidEncoding(format!("expected {N} bytes, got {}", bytes.len()))
    })
}

/// `#[serde(with = "crate::encoding::b64")]` for `Vec<u8>` fields.
pub mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "crate::encoding::b64_array")]` for `[u8; N]` fields.
pub mod b64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode_array(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_first() {
        let decoded = decode_flexible("c2FsdHNhbHQ=").unwrap();
        assert_eq!(decoded, Decoded::Base64(b"saltsalt".to_vec()));
    }

    #[test]
    fn test_decode_hex_fallback() {
        // 10 chars: not valid padded base64, valid hex
        let decoded = decode_flexible("00ff00ff00").unwrap();
        assert_eq!(decoded, Decoded::Hex(vec![0x00, 0xff, 0x00, 0xff, 0x00]));
    }

    #[test]
    fn test_decode_hex_of_common_salt_sizes() {
        for n in [16usize, 32] {
            let salt: Vec<u8> = (0..n as u8).map(|i| i.wrapping_mul(37)).collect();
            let encoded = hex::encode(&salt);
            assert_eq!(encoded.len() % 4, 0);

            let decoded = decode_flexible_len(&encoded, &[16, 32]).unwrap();
            assert_eq!(decoded, Decoded::Hex(salt.clone()));

            let b64 = decode_flexible_len(&base64_encode(&salt), &[16, 32]).unwrap();
            assert_eq!(b64, Decoded::Base64(salt));
        }
    }

    #[test]
    fn test_decode_len_unexpected_length_keeps_order() {
        let decoded = decode_flexible_len("c2FsdHNhbHQ=", &[16, 32]).unwrap();
        assert_eq!(decoded, Decoded::Base64(b"saltsalt".to_vec()));
        assert!(decode_flexible_len("%%%", &[16]).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_flexible("not*valid*anything").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEncoding(_)));
        assert!(decode_flexible("   ").is_err());
    }

    #[test]
    fn test_base64_array_length_checked() {
        let encoded = base64_encode(&[7u8; 24]);
        let arr: [u8; 24] = base64_decode_array(&encoded).unwrap();
        assert_eq!(arr, [7u8; 24]);

        let short: CryptoResult<[u8; 32]> = base64_decode_array(&encoded);
        assert!(short.is_err());
    }
}
