//! Device identity: a local Ed25519 keypair that signs outgoing requests.
//!
//! The signed payload is the literal string `method:path:timestamp`
//! (timestamp in Unix seconds). Requests carry the device id, the hex
//! signature and the timestamp; the server checks freshness and the
//! signature against the device's registered public key.

use std::time::{SystemTime, UNIX_EPOCH};

use cairn_crypto::sign::{ed25519_signing_key, verify_ed25519};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{DeviceError, DeviceResult};
use crate::store::{DeviceStore, StoredIdentity, STORED_IDENTITY_VERSION};

pub const HEADER_DEVICE_ID: &str = "x-cairn-device-id";
pub const HEADER_SIGNATURE: &str = "x-cairn-device-signature";
pub const HEADER_TIMESTAMP: &str = "x-cairn-device-timestamp";

pub struct DeviceIdentity {
    device_id: String,
    device_name: String,
    signing_key: SigningKey,
    created_at: u64,
}

impl DeviceIdentity {
    /// Fresh identity with a random keypair and UUID v4 device id.
    pub fn generate(device_name: &str) -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: device_name.to_string(),
            signing_key: SigningKey::generate(&mut OsRng),
            created_at: unix_now(),
        }
    }

    /// Load the persisted identity, or create and persist one. Repeated
    /// calls against the same store return the same keypair, including
    /// calls that race on first use: the loser adopts the winner's key.
    pub fn init(store: &dyn DeviceStore) -> DeviceResult<Self> {
        if let Some(existing) = Self::load(store)? {
            tracing::debug!(device_id = %existing.device_id, "device identity loaded");
            return Ok(existing);
        }

        let identity = Self::generate(&default_device_name());
        if !store.insert_if_absent(&identity.to_stored())? {
            tracing::debug!("device identity created concurrently; adopting it");
            return Self::load(store)?.ok_or_else(|| {
                DeviceError::Store(format!("{} emptied during init", store.describe()))
            });
        }
        tracing::info!(
            device_id = %identity.device_id,
            fingerprint = %identity.fingerprint(),
            store = %store.describe(),
            "device identity created"
        );
        Ok(identity)
    }

    pub fn load(store: &dyn DeviceStore) -> DeviceResult<Option<Self>> {
        store.load()?.map(|s| Self::from_stored(&s)).transpose()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Short BLAKE3 fingerprint of the public key, for display.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(self.signing_key.verifying_key().as_bytes());
        digest.to_hex().as_str()[..16].to_string()
    }

    /// Hex Ed25519 signature over `method:path:timestamp`.
    pub fn sign_request(&self, method: &str, path: &str, timestamp: u64) -> String {
        let payload = signing_payload(method, path, timestamp);
        hex::encode(self.signing_key.sign(payload.as_bytes()).to_bytes())
    }

    /// Sign with the current time and package the request metadata.
    pub fn sign_request_now(&self, method: &str, path: &str) -> RequestSignature {
        let timestamp = unix_now();
        RequestSignature {
            device_id: self.device_id.clone(),
            signature: self.sign_request(method, path, timestamp),
            timestamp,
        }
    }

    fn to_stored(&self) -> StoredIdentity {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        StoredIdentity {
            version: STORED_IDENTITY_VERSION,
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            secret_key: hex::encode(seed.as_slice()),
            public_key: self.public_key_hex(),
            created_at: self.created_at,
        }
    }

    fn from_stored(stored: &StoredIdentity) -> DeviceResult<Self> {
        let seed = Zeroizing::new(
            hex::decode(&stored.secret_key)
                .map_err(|e| DeviceError::CorruptIdentity(format!("secret key: {e}")))?,
        );
        let signing_key = ed25519_signing_key(&seed)
            .map_err(|e| DeviceError::CorruptIdentity(e.to_string()))?;

        let identity = Self {
            device_id: stored.device_id.clone(),
            device_name: stored.device_name.clone(),
            signing_key,
            created_at: stored.created_at,
        };
        if !identity.public_key_hex().eq_ignore_ascii_case(&stored.public_key) {
            return Err(DeviceError::CorruptIdentity(
                "stored public key does not match secret key".into(),
            ));
        }
        Ok(identity)
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Metadata attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignature {
    pub device_id: String,
    /// Hex Ed25519 signature
    pub signature: String,
    pub timestamp: u64,
}

impl RequestSignature {
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_DEVICE_ID, self.device_id.clone()),
            (HEADER_SIGNATURE, self.signature.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
        ]
    }
}

/// Initialize the device identity and return its public key (hex).
pub fn init_device(store: &dyn DeviceStore) -> DeviceResult<String> {
    Ok(DeviceIdentity::init(store)?.public_key_hex())
}

pub fn signing_payload(method: &str, path: &str, timestamp: u64) -> String {
    format!("{method}:{path}:{timestamp}")
}

/// Server-side check of a signed request: freshness first, then signature.
pub fn verify_request(
    public_key_hex: &str,
    method: &str,
    path: &str,
    timestamp: u64,
    signature_hex: &str,
    now: u64,
    max_skew_secs: u64,
) -> DeviceResult<()> {
    if now.abs_diff(timestamp) > max_skew_secs {
        return Err(DeviceError::StaleTimestamp {
            timestamp,
            now,
            max_skew_secs,
        });
    }

    let (Ok(public_key), Ok(signature)) =
        (hex::decode(public_key_hex), hex::decode(signature_hex))
    else {
        return Err(DeviceError::InvalidSignature);
    };
    let payload = signing_payload(method, path, timestamp);
    if verify_ed25519(&public_key, payload.as_bytes(), &signature) {
        Ok(())
    } else {
        Err(DeviceError::InvalidSignature)
    }
}

/// Hostname, for naming new identities.
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".into())
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileDeviceStore, MemoryDeviceStore};

    #[test]
    fn test_init_is_idempotent() {
        let store = MemoryDeviceStore::new();
        let first = init_device(&store).unwrap();
        let second = init_device(&store).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_init_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");

        let created = DeviceIdentity::init(&FileDeviceStore::new(&path)).unwrap();
        let reloaded = DeviceIdentity::init(&FileDeviceStore::new(&path)).unwrap();

        assert_eq!(created.public_key_hex(), reloaded.public_key_hex());
        assert_eq!(created.device_id(), reloaded.device_id());
        assert!(uuid::Uuid::parse_str(created.device_id()).is_ok());
    }

    #[test]
    fn test_concurrent_first_use_agrees() {
        use std::sync::{Arc, Barrier};

        for _ in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("device.json");
            let barrier = Arc::new(Barrier::new(4));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let path = path.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        init_device(&FileDeviceStore::new(&path))
                    })
                })
                .collect();
            let keys: Vec<String> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect();

            let persisted = DeviceIdentity::load(&FileDeviceStore::new(&path))
                .unwrap()
                .unwrap()
                .public_key_hex();
            assert!(keys.iter().all(|k| *k == persisted));
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        }
    }

    #[test]
    fn test_concurrent_first_use_memory_store() {
        let store = std::sync::Arc::new(MemoryDeviceStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || init_device(store.as_ref()).unwrap())
            })
            .collect();
        let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = DeviceIdentity::generate("laptop");
        let sig = identity.sign_request("POST", "/api/v1/items", 1_700_000_000);

        verify_request(
            &identity.public_key_hex(),
            "POST",
            "/api/v1/items",
            1_700_000_000,
            &sig,
            1_700_000_030,
            300,
        )
        .unwrap();
    }

    #[test]
    fn test_signature_bound_to_each_field() {
        let identity = DeviceIdentity::generate("laptop");
        let pk = identity.public_key_hex();
        let ts = 1_700_000_000;
        let sig = identity.sign_request("GET", "/a", ts);

        let check = |m: &str, p: &str, t: u64| verify_request(&pk, m, p, t, &sig, ts, 300);
        assert!(check("GET", "/a", ts).is_ok());
        assert!(matches!(check("PUT", "/a", ts), Err(DeviceError::InvalidSignature)));
        assert!(matches!(check("GET", "/b", ts), Err(DeviceError::InvalidSignature)));
        assert!(matches!(check("GET", "/a", ts + 1), Err(DeviceError::InvalidSignature)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let identity = DeviceIdentity::generate("laptop");
        let sig = identity.sign_request("GET", "/", 1_000);

        let err = verify_request(&identity.public_key_hex(), "GET", "/", 1_000, &sig, 1_301, 300)
            .unwrap_err();
        assert!(matches!(err, DeviceError::StaleTimestamp { .. }));

        // Future-dated beyond the window too
        let err = verify_request(&identity.public_key_hex(), "GET", "/", 1_000, &sig, 600, 300)
            .unwrap_err();
        assert!(matches!(err, DeviceError::StaleTimestamp { .. }));
    }

    #[test]
    fn test_other_device_key_rejected() {
        let a = DeviceIdentity::generate("a");
        let b = DeviceIdentity::generate("b");
        let sig = a.sign_request("GET", "/", 5);

        assert!(verify_request(&b.public_key_hex(), "GET", "/", 5, &sig, 5, 300).is_err());
        assert!(verify_request("zz", "GET", "/", 5, &sig, 5, 300).is_err());
    }

    #[test]
    fn test_corrupt_stored_identity() {
        let store = MemoryDeviceStore::new();
        let identity = DeviceIdentity::generate("x");
        let mut stored = identity.to_stored();
        stored.public_key = DeviceIdentity::generate("y").public_key_hex();
        store.save(&stored).unwrap();

        assert!(matches!(
            DeviceIdentity::load(&store),
            Err(DeviceError::CorruptIdentity(_))
        ));

        stored.secret_key = "abc".into();
        store.save(&stored).unwrap();
        assert!(matches!(
            DeviceIdentity::init(&store),
            Err(DeviceError::CorruptIdentity(_))
        ));
    }

    #[test]
    fn test_request_headers() {
        let identity = DeviceIdentity::generate("laptop");
        let signed = identity.sign_request_now("DELETE", "/api/v1/items/42");
        let headers = signed.headers();

        assert_eq!(headers[0], (HEADER_DEVICE_ID, identity.device_id().to_string()));
        assert_eq!(headers[1].1.len(), 128);
        assert_eq!(headers[2].1, signed.timestamp.to_string());
    }

    proptest::proptest! {
        #[test]
        fn test_any_request_verifies(
            method in "[A-Z]{3,7}",
            path in "/[ -~]{0,64}",
            ts in 0u64..4_000_000_000,
        ) {
            let identity = DeviceIdentity::generate("prop");
            let sig = identity.sign_request(&method, &path, ts);
            proptest::prop_assert!(
                verify_request(&identity.public_key_hex(), &method, &path, ts, &sig, ts, 0).is_ok()
            );
        }
    }

    #[test]
    fn test_debug_hides_secret() {
        let identity = DeviceIdentity::generate("laptop");
        let seed = hex::encode(identity.signing_key.to_bytes());
        assert!(!format!("{identity:?}").contains(&seed));
    }
}
