//! Session-scoped holder for the live master key.
//!
//! One slot per logged-in session: populated at login, cleared at logout or
//! when the TTL lapses. Operations borrow the key for their duration instead
//! of keeping their own copy.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

use crate::error::{CryptoError, CryptoResult};
use crate::master::MasterKey;

struct Unlocked {
    key: MasterKey,
    unlocked_at: Instant,
}

pub struct MasterKeySlot {
    inner: RwLock<Option<Unlocked>>,
    ttl: Option<Duration>,
}

impl MasterKeySlot {
    /// A slot that holds its key until [`lock`](Self::lock) is called.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            ttl: None,
        }
    }

    /// A slot whose key expires `ttl` after unlock.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl: Some(ttl),
        }
    }

    /// Install the master key for this session, replacing any previous one.
    pub fn unlock(&self, key: MasterKey) {
        *self.inner.write() = Some(Unlocked {
            key,
            unlocked_at: Instant::now(),
        });
        tracing::debug!("session master key loaded");
    }

    /// Drop the master key (logout). The key is zeroized as it drops.
    pub fn lock(&self) {
        if self.inner.write().take().is_some() {
            tracing::debug!("session master key cleared");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.expire_if_stale();
        self.inner.read().is_some()
    }

    /// Run `f` with a borrowed master key.
    pub fn with_master_key<T>(
        &self,
        f: impl FnOnce(&MasterKey) -> CryptoResult<T>,
    ) -> CryptoResult<T> {
        self.expire_if_stale();
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(unlocked) => f(&unlocked.key),
            None => Err(CryptoError::Locked),
        }
    }

    /// Copy of the master key for an in-flight operation that must outlive
    /// the read guard (e.g. moved onto a worker thread).
    pub fn master_key(&self) -> CryptoResult<MasterKey> {
        self.with_master_key(|k| Ok(k.clone()))
    }

    fn expire_if_stale(&self) {
        let Some(ttl) = self.ttl else { return };
        let stale = self
            .inner
            .read()
            .as_ref()
            .is_some_and(|u| u.unlocked_at.elapsed() >= ttl);
        if !stale {
            return;
        }

        // Another thread may have unlocked since the read; decide again.
        let mut guard = self.inner.write();
        if guard
            .as_ref()
            .is_some_and(|u| u.unlocked_at.elapsed() >= ttl)
        {
            guard.take();
            tracing::warn!("session master key expired");
        }
    }
}

impl Default for MasterKeySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MasterKeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeySlot")
            .field("unlocked", &self.inner.read().is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}
