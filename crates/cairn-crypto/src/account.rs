//! Everything an account stores server-side, in one serializable record.
//!
//! The record holds only ciphertext and digests: the password envelope, the
//! wrapped keyring, the recovery bundle and the mnemonic verification hash.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfParams;
use crate::keyring::{self, KeyringBundle, UnlockedKeyring};
use crate::master::{MasterKey, MasterKeyEnvelope};
use crate::recovery::{self, RecoveryBundle};

pub const ACCOUNT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountKeys {
    pub version: u32,
    pub master_key: MasterKeyEnvelope,
    pub keyring: KeyringBundle,
    pub recovery: RecoveryBundle,
    pub recovery_verification_hash: String,
}

/// A freshly created account. `mnemonic` must be shown to the user once.
#[derive(Debug)]
pub struct NewAccount {
    pub keys: AccountKeys,
    pub mnemonic: SecretString,
    pub master: MasterKey,
}

impl AccountKeys {
    /// Register: random Master Key, password envelope, keyring, recovery.
    pub fn create(password: &SecretString, params: &KdfParams) -> CryptoResult<NewAccount> {
        let master = MasterKey::generate();
        let (keys, mnemonic) = Self::seal_all(&master, password, params, None)?;
        tracing::info!("account keys created");
        Ok(NewAccount {
            keys,
            mnemonic,
            master,
        })
    }

    fn seal_all(
        master: &MasterKey,
        password: &SecretString,
        params: &KdfParams,
        keyring: Option<KeyringBundle>,
    ) -> CryptoResult<(AccountKeys, SecretString)> {
        let keyring = match keyring {
            Some(k) => k,
            None => keyring::generate_keyring(master)?,
        };
        let setup = recovery::setup_recovery(master)?;
        let keys = AccountKeys {
            version: ACCOUNT_FORMAT_VERSION,
            master_key: MasterKeyEnvelope::wrap_with_password(master, password, params)?,
            keyring,
            recovery: setup.bundle,
            recovery_verification_hash: setup.verification_hash,
        };
        Ok((keys, setup.mnemonic))
    }

    pub fn open_master_key(&self, password: &SecretString) -> CryptoResult<MasterKey> {
        self.master_key.open_with_password(password)
    }

    /// [`open_master_key`](Self::open_master_key) off the async executor.
    pub async fn open_master_key_cancellable(
        &self,
        password: SecretString,
        cancel: CancellationToken,
    ) -> CryptoResult<MasterKey> {
        self.master_key
            .open_with_password_cancellable(password, cancel)
            .await
    }

    pub fn unlock_keyring(&self, master: &MasterKey) -> CryptoResult<UnlockedKeyring> {
        keyring::unlock_keyring(&self.keyring, master)
    }

    /// Login: open the Master Key and the keyring it protects.
    pub fn unlock_with_password(
        &self,
        password: &SecretString,
    ) -> CryptoResult<(MasterKey, UnlockedKeyring)> {
        let master = self.open_master_key(password)?;
        let unlocked = self.unlock_keyring(&master)?;
        Ok((master, unlocked))
    }

    /// Forgotten password: open the Master Key with the mnemonic and re-wrap
    /// it under `new_password`. The recovery bundle is left as is.
    pub fn recover_with_mnemonic(
        &mut self,
        mnemonic: &SecretString,
        new_password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<MasterKey> {
        if !recovery::verify_mnemonic(mnemonic, &self.recovery_verification_hash) {
            tracing::warn!("mnemonic does not match stored verification hash");
            return Err(CryptoError::RecoveryFailed);
        }
        let master = recovery::recover_master_key(mnemonic, &self.recovery)?;

        // The recovered key must still open this account's keyring.
        self.unlock_keyring(&master).map_err(|e| match e {
            CryptoError::MasterKeyMismatch => CryptoError::RecoveryFailed,
            other => other,
        })?;

        self.master_key = MasterKeyEnvelope::wrap_with_password(&master, new_password, params)?;
        tracing::info!("master key re-wrapped after mnemonic recovery");
        Ok(master)
    }

    pub fn change_password(
        &mut self,
        old_password: &SecretString,
        new_password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<()> {
        let master = self.open_master_key(old_password)?;
        self.master_key = MasterKeyEnvelope::wrap_with_password(&master, new_password, params)?;
        tracing::info!("account password changed");
        Ok(())
    }

    /// New Master Key epoch. The keyring wrap keys, the password envelope
    /// and the recovery bundle are all replaced; the returned mnemonic
    /// supersedes the old one.
    pub fn rotate_master_key(
        &mut self,
        password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<(MasterKey, SecretString)> {
        let old = self.open_master_key(password)?;
        let new = MasterKey::generate();

        let rotated = keyring::rotate_master_key(&self.keyring, &old, &new)?;
        let (keys, mnemonic) = Self::seal_all(&new, password, params, Some(rotated))?;
        *self = keys;

        tracing::info!("master key rotated");
        Ok((new, mnemonic))
    }

    /// Convert a legacy wallet-signature envelope to the password scheme.
    pub fn migrate_legacy(
        &mut self,
        wallet_signature: &[u8],
        password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<MasterKey> {
        let (envelope, master) = self
            .master_key
            .migrate_legacy(wallet_signature, password, params)?;
        self.master_key = envelope;
        Ok(master)
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> CryptoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::test_params;
    use crate::keyring::Algorithm;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s)
    }

    #[test]
    fn test_create_then_unlock() {
        let created = AccountKeys::create(&pw("hunter2"), &test_params()).unwrap();
        let (master, unlocked) = created.keys.unlock_with_password(&pw("hunter2")).unwrap();

        assert_eq!(master.as_bytes(), created.master.as_bytes());
        assert_eq!(unlocked.secret_key(Algorithm::Ed25519).len(), 32);
    }

    #[test]
    fn test_wrong_password_is_credential_failure() {
        let created = AccountKeys::create(&pw("hunter2"), &test_params()).unwrap();
        let err = created.keys.unlock_with_password(&pw("hunter3")).unwrap_err();

        assert!(matches!(err, CryptoError::MasterKeyMismatch));
        assert!(err.is_credential_failure());
    }

    #[test]
    fn test_recover_with_mnemonic_rewraps_password() {
        let created = AccountKeys::create(&pw("forgotten"), &test_params()).unwrap();
        let mut keys = created.keys;

        let master = keys
            .recover_with_mnemonic(&created.mnemonic, &pw("fresh"), &test_params())
            .unwrap();
        assert_eq!(master.as_bytes(), created.master.as_bytes());

        assert!(keys.unlock_with_password(&pw("forgotten")).is_err());
        assert!(keys.unlock_with_password(&pw("fresh")).is_ok());
    }

    #[test]
    fn test_recover_with_wrong_mnemonic() {
        let a = AccountKeys::create(&pw("a"), &test_params()).unwrap();
        let b = AccountKeys::create(&pw("b"), &test_params()).unwrap();
        let mut keys = a.keys;

        assert!(matches!(
            keys.recover_with_mnemonic(&b.mnemonic, &pw("x"), &test_params()),
            Err(CryptoError::RecoveryFailed)
        ));
        // Password envelope untouched
        assert!(keys.unlock_with_password(&pw("a")).is_ok());
    }

    #[test]
    fn test_change_password() {
        let mut keys = AccountKeys::create(&pw("old"), &test_params()).unwrap().keys;
        keys.change_password(&pw("old"), &pw("new"), &test_params())
            .unwrap();
        assert!(keys.open_master_key(&pw("new")).is_ok());
        assert!(keys.open_master_key(&pw("old")).is_err());
    }

    #[test]
    fn test_rotate_master_key() {
        let created = AccountKeys::create(&pw("pw"), &test_params()).unwrap();
        let mut keys = created.keys.clone();
        let (_, before) = keys.unlock_with_password(&pw("pw")).unwrap();

        let (new_master, new_mnemonic) = keys.rotate_master_key(&pw("pw"), &test_params()).unwrap();
        assert_ne!(new_master.as_bytes(), created.master.as_bytes());

        let (master, after) = keys.unlock_with_password(&pw("pw")).unwrap();
        assert_eq!(master.as_bytes(), new_master.as_bytes());
        for alg in Algorithm::ALL {
            assert_eq!(before.secret_key(alg), after.secret_key(alg));
        }

        // Old master key no longer opens anything
        assert!(matches!(
            keys.unlock_keyring(&created.master),
            Err(CryptoError::MasterKeyMismatch)
        ));
        // Old mnemonic is superseded
        assert!(!recovery::verify_mnemonic(
            &created.mnemonic,
            &keys.recovery_verification_hash
        ));
        assert!(recovery::verify_mnemonic(
            &new_mnemonic,
            &keys.recovery_verification_hash
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let created = AccountKeys::create(&pw("pw"), &test_params()).unwrap();
        let json = created.keys.to_json().unwrap();

        assert!(json.contains("\"scheme\": \"password-v2\""));

        let back = AccountKeys::from_json(&json).unwrap();
        let (master, _) = back.unlock_with_password(&pw("pw")).unwrap();
        assert_eq!(master.as_bytes(), created.master.as_bytes());
    }

    #[test]
    fn test_migrate_legacy_envelope() {
        let created = AccountKeys::create(&pw("unused"), &test_params()).unwrap();
        let mut keys = created.keys;
        let signature = b"0xwallet-signature-bytes";
        keys.master_key =
            MasterKeyEnvelope::wrap_with_wallet_signature(&created.master, signature).unwrap();

        assert!(keys.open_master_key(&pw("unused")).is_err());

        let master = keys
            .migrate_legacy(signature, &pw("chosen"), &test_params())
            .unwrap();
        assert_eq!(master.as_bytes(), created.master.as_bytes());
        assert!(!keys.master_key.is_legacy());
        assert!(keys.unlock_with_password(&pw("chosen")).is_ok());
    }

    #[tokio::test]
    async fn test_cancellable_open() {
        let created = AccountKeys::create(&pw("pw"), &test_params()).unwrap();
        let master = created
            .keys
            .open_master_key_cancellable(pw("pw"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(master.as_bytes(), created.master.as_bytes());
    }
}
