use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CairnError, CairnResult};

/// Top-level client configuration (loaded from cairn.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub logging: LoggingConfig,
    pub kdf: KdfConfig,
    pub session: SessionConfig,
    pub device: DeviceConfig,
    pub account: AccountConfig,
}

impl CairnConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> CairnResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CairnError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Argon2id parameters for the password path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 1)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds an unlocked master key stays in memory (0 = until lock)
    pub master_key_ttl_secs: u64,
}

/// Where the device signing key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStoreKind {
    File,
    Keychain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Storage backend for the device identity
    pub store: DeviceStoreKind,
    /// Identity file path for the `file` backend
    pub identity_path: PathBuf,
    /// Keychain service name for the `keychain` backend
    pub keychain_service: String,
    /// Accepted clock skew when verifying signed requests
    pub max_skew_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// JSON file holding the wrapped master key, keyring and recovery bundle
    pub keys_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            master_key_ttl_secs: 3600,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            store: DeviceStoreKind::File,
            identity_path: PathBuf::from("~/.config/cairn/device.json"),
            keychain_service: "cairn".into(),
            max_skew_secs: 300,
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            keys_path: PathBuf::from("~/.local/share/cairn/account.json"),
        }
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}
