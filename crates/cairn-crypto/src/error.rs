use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failure taxonomy for the key-management engine.
///
/// Variants are split so callers can tell "wrong credentials" (re-prompt)
/// from "corrupted data" (surface loudly, offer support/recovery).
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD tag mismatch. Hostile or corrupted input; never retried.
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("ciphertext too short: {len} bytes (minimum {min})")]
    Truncated { len: usize, min: usize },

    /// Authenticated plaintext whose framing is not one we produce.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("master key mismatch: wrong password or expired session")]
    MasterKeyMismatch,

    #[error("corrupt key material for {algorithm}: {detail}")]
    CorruptKeyMaterial {
        algorithm: &'static str,
        detail: String,
    },

    #[error("keyring incomplete: missing {0}")]
    IncompleteKeyring(String),

    #[error("recovery failed: wrong mnemonic or corrupted recovery bundle")]
    RecoveryFailed,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid {what} length: {got} bytes (expected {expected})")]
    InvalidLength {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("session locked: no master key loaded")]
    Locked,

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CryptoError {
    /// Wrong password, wrong mnemonic or an expired session.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::MasterKeyMismatch | CryptoError::RecoveryFailed | CryptoError::Locked
        )
    }

    /// Stored data failed validation after authentication succeeded, or
    /// ciphertext was tampered with.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CryptoError::Decryption
                | CryptoError::Truncated { .. }
                | CryptoError::MalformedEnvelope(_)
                | CryptoError::CorruptKeyMaterial { .. }
        )
    }

    /// Message suitable for showing to an end user. Credential failures stay
    /// generic to avoid acting as an oracle.
    pub fn user_message(&self) -> String {
        if self.is_credential_failure() {
            return "could not unlock your data".to_string();
        }
        match self {
            CryptoError::IncompleteKeyring(_) => {
                "account setup was not completed; run setup repair".to_string()
            }
            CryptoError::Cancelled => "operation cancelled".to_string(),
            e if e.is_corruption() => {
                format!("stored key data is corrupted, please contact support ({e})")
            }
            e => e.to_string(),
        }
    }
}
