//! cairn: zero-knowledge account key CLI
//!
//! Commands:
//!   config show                         - display current configuration
//!   account init|unlock|recover|passwd|rotate|status
//!   manifest create <name> <parent>     - encrypt, dual-sign, tag
//!   manifest verify <file>              - check both signatures
//!   device init|show|sign|verify|reset  - per-device request signing key

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cairn_core::config::{expand_tilde, CairnConfig};
use cairn_crypto::{
    manifest, AccountKeys, CryptoError, ItemKind, KdfParams, MasterKey, MasterKeySlot,
    SignedManifest,
};
use cairn_secrets::{device, open_store, DeviceIdentity};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cairn",
    version,
    about = "Cairn zero-knowledge key management",
    long_about = "cairn: create and unlock account keys, sign manifests, \
                  and manage this device's request-signing identity"
)]
struct Cli {
    /// Path to cairn.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CAIRN_CONFIG",
        default_value = "~/.config/cairn/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "CAIRN_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging] format
    #[arg(long, env = "CAIRN_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Account keys: master key, keyring, recovery
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Signed item manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },

    /// This device's request-signing identity
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    /// Create a new account key file and print the recovery phrase once
    Init {
        /// Overwrite an existing account key file
        #[arg(long)]
        force: bool,
    },
    /// Unlock with the password and show the account's public keys
    Unlock,
    /// Regain access with the recovery phrase and set a new password
    Recover,
    /// Change the account password
    Passwd,
    /// Generate a new master key; prints a new recovery phrase
    Rotate,
    /// Show what the account key file contains, without unlocking
    Status,
}

#[derive(Subcommand, Debug)]
enum ManifestAction {
    /// Encrypt a name, build its manifest, and sign it with both keys
    Create {
        /// Plaintext item name
        name: String,
        /// Parent container reference
        parent: String,
        /// Item is a folder (default: file)
        #[arg(long)]
        folder: bool,
        /// Write the signed manifest here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Verify a signed manifest file
    Verify {
        /// Signed manifest JSON
        file: PathBuf,
        /// Also require the signatures to come from this account's keys
        #[arg(long)]
        owner: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Create the device identity if missing and print its public key
    Init,
    /// Show the device identity
    Show,
    /// Sign a request and print the metadata headers
    Sign {
        /// HTTP method (e.g. POST)
        method: String,
        /// Request path (e.g. /api/v1/items)
        path: String,
        /// Unix timestamp to sign (default: now)
        #[arg(long)]
        timestamp: Option<u64>,
    },
    /// Verify a signed request as the server would
    Verify {
        /// Device public key (hex)
        public_key: String,
        method: String,
        path: String,
        timestamp: u64,
        /// Request signature (hex)
        signature: String,
    },
    /// Delete the device identity from its store
    Reset,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    init_logging(&config, cli.log.as_deref(), cli.log_format.as_ref());

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Account { action } => match action {
            AccountAction::Init { force } => cmd_account_init(&config, force).await,
            AccountAction::Unlock => cmd_account_unlock(&config).await,
            AccountAction::Recover => cmd_account_recover(&config).await,
            AccountAction::Passwd => cmd_account_passwd(&config).await,
            AccountAction::Rotate => cmd_account_rotate(&config).await,
            AccountAction::Status => cmd_account_status(&config).await,
        },
        Commands::Manifest { action } => match action {
            ManifestAction::Create {
                name,
                parent,
                folder,
                out,
            } => {
                let kind = if folder { ItemKind::Folder } else { ItemKind::File };
                cmd_manifest_create(&config, &name, &parent, kind, out.as_deref()).await
            }
            ManifestAction::Verify { file, owner } => {
                cmd_manifest_verify(&config, &file, owner).await
            }
        },
        Commands::Device { action } => match action {
            DeviceAction::Init => cmd_device_init(&config),
            DeviceAction::Show => cmd_device_show(&config),
            DeviceAction::Sign {
                method,
                path,
                timestamp,
            } => {
                cmd_device_sign(&config, &method, &path, timestamp)
            }
            DeviceAction::Verify {
                public_key,
                method,
                path,
                timestamp,
                signature,
            } => {
                cmd_device_verify(&config, &public_key, &method, &path, timestamp, &signature)
            }
            DeviceAction::Reset => cmd_device_reset(&config),
        },
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<CairnConfig> {
    CairnConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(config: &CairnConfig, level: Option<&str>, format: Option<&LogFormat>) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = level.unwrap_or(config.logging.level.as_str());
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = match format {
        Some(LogFormat::Json) => true,
        Some(LogFormat::Text) => false,
        None => config.logging.format.eq_ignore_ascii_case("json"),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn kdf_params(config: &CairnConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.kdf.argon2_mem_cost_kib,
        time_cost: config.kdf.argon2_time_cost,
        parallelism: config.kdf.argon2_parallelism,
    }
}

fn session_slot(config: &CairnConfig) -> MasterKeySlot {
    match config.session.master_key_ttl_secs {
        0 => MasterKeySlot::new(),
        secs => MasterKeySlot::with_ttl(Duration::from_secs(secs)),
    }
}

/// Map an engine error to what the user sees. Credential failures stay
/// generic; details go to the debug log.
fn user_facing(e: CryptoError) -> anyhow::Error {
    tracing::debug!(error = %e, "key operation failed");
    anyhow::anyhow!(e.user_message())
}

// ── Prompts + spinner ─────────────────────────────────────────────────────────

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

fn prompt_new_password() -> Result<SecretString> {
    let first = prompt_secret("New password: ")?;
    if first.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    let second = prompt_secret("Repeat password: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Run a blocking key operation on the blocking pool behind a spinner.
async fn with_spinner<T, F>(prefix: &str, msg: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
{
    let pb = make_spinner(prefix);
    pb.set_message(msg.to_string());
    let joined = tokio::task::spawn_blocking(f).await;
    pb.finish_and_clear();
    joined.context("key operation task failed")?.map_err(user_facing)
}

// ── Account file ──────────────────────────────────────────────────────────────

fn account_path(config: &CairnConfig) -> PathBuf {
    expand_tilde(&config.account.keys_path)
}

async fn read_account(config: &CairnConfig) -> Result<AccountKeys> {
    let path = account_path(config);
    let json = tokio::fs::read_to_string(&path).await.with_context(|| {
        format!(
            "reading account keys: {} (run `cairn account init` first)",
            path.display()
        )
    })?;
    AccountKeys::from_json(&json).map_err(user_facing)
}

async fn write_account(config: &CairnConfig, keys: &AccountKeys) -> Result<()> {
    let path = account_path(config);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    let json = keys.to_json().map_err(user_facing)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "account keys written");
    Ok(())
}

/// Password prompt + Argon2id off the runtime; Ctrl-C abandons the derivation.
async fn unlock_master(keys: &AccountKeys) -> Result<MasterKey> {
    let password = prompt_secret("Password: ")?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let pb = make_spinner("unlock");
    pb.set_message("deriving key (Ctrl-C to cancel)");
    let result = keys.open_master_key_cancellable(password, cancel).await;
    pb.finish_and_clear();
    watcher.abort();

    result.map_err(user_facing)
}

fn print_mnemonic(mnemonic: &SecretString) {
    println!();
    println!("Recovery phrase (write it down; it will not be shown again):");
    println!();
    for (i, chunk) in mnemonic
        .expose_secret()
        .split_whitespace()
        .collect::<Vec<_>>()
        .chunks(6)
        .enumerate()
    {
        println!("  {:>2}. {}", i * 6 + 1, chunk.join(" "));
    }
    println!();
}

// ── `cairn config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &CairnConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `cairn account ...` ───────────────────────────────────────────────────────

async fn cmd_account_init(config: &CairnConfig, force: bool) -> Result<()> {
    let path = account_path(config);
    if path.exists() && !force {
        anyhow::bail!(
            "account keys already exist at {} (use --force to replace them)",
            path.display()
        );
    }

    let password = prompt_new_password()?;
    let params = kdf_params(config);
    let created = with_spinner("init", "generating keys", move || {
        AccountKeys::create(&password, &params)
    })
    .await?;

    write_account(config, &created.keys).await?;
    println!("Account keys written to {}", path.display());
    print_mnemonic(&created.mnemonic);
    Ok(())
}

async fn cmd_account_unlock(config: &CairnConfig) -> Result<()> {
    let keys = read_account(config).await?;
    let slot = session_slot(config);
    slot.unlock(unlock_master(&keys).await?);

    let public = slot
        .with_master_key(|mk| keys.unlock_keyring(mk))
        .map_err(user_facing)?
        .public_keys()
        .clone();

    println!("Unlocked.");
    println!("  ed25519:    {}", hex_prefix(&public.ed25519));
    println!("  x25519:     {}", hex_prefix(&public.x25519));
    println!("  ml-kem-768: {} ({} bytes)", hex_prefix(&public.ml_kem), public.ml_kem.len());
    println!("  ml-dsa-65:  {} ({} bytes)", hex_prefix(&public.ml_dsa), public.ml_dsa.len());

    slot.lock();
    Ok(())
}

async fn cmd_account_recover(config: &CairnConfig) -> Result<()> {
    let mut keys = read_account(config).await?;
    let mnemonic = prompt_secret("Recovery phrase: ")?;
    let password = prompt_new_password()?;
    let params = kdf_params(config);

    let keys = with_spinner("recover", "re-wrapping master key", move || {
        keys.recover_with_mnemonic(&mnemonic, &password, &params)?;
        Ok(keys)
    })
    .await?;

    write_account(config, &keys).await?;
    println!("Recovered. The new password is now active.");
    Ok(())
}

async fn cmd_account_passwd(config: &CairnConfig) -> Result<()> {
    let mut keys = read_account(config).await?;
    let old = prompt_secret("Current password: ")?;
    let new = prompt_new_password()?;
    let params = kdf_params(config);

    let keys = with_spinner("passwd", "re-wrapping master key", move || {
        keys.change_password(&old, &new, &params)?;
        Ok(keys)
    })
    .await?;

    write_account(config, &keys).await?;
    println!("Password changed.");
    Ok(())
}

async fn cmd_account_rotate(config: &CairnConfig) -> Result<()> {
    let mut keys = read_account(config).await?;
    let password = prompt_secret("Password: ")?;
    let params = kdf_params(config);

    let (keys, mnemonic) = with_spinner("rotate", "rotating master key", move || {
        let (_, mnemonic) = keys.rotate_master_key(&password, &params)?;
        Ok((keys, mnemonic))
    })
    .await?;

    write_account(config, &keys).await?;
    println!("Master key rotated. The previous recovery phrase no longer works.");
    print_mnemonic(&mnemonic);
    Ok(())
}

async fn cmd_account_status(config: &CairnConfig) -> Result<()> {
    let path = account_path(config);
    let keys = read_account(config).await?;

    println!("Account keys: {}", path.display());
    println!("  format version: {}", keys.version);
    println!(
        "  master key:     {}",
        if keys.master_key.is_legacy() { "wallet-signature-v1 (legacy)" } else { "password-v2" }
    );
    match keys.keyring.public_keys() {
        Ok(_) => println!("  keyring:        complete (4 keypairs)"),
        Err(e) => println!("  keyring:        {}", e.user_message()),
    }
    println!("  recovery:       configured");
    Ok(())
}

fn hex_prefix(bytes: &[u8]) -> String {
    format!("{}…", hex::encode(&bytes[..bytes.len().min(8)]))
}

// ── `cairn manifest ...` ──────────────────────────────────────────────────────

async fn cmd_manifest_create(
    config: &CairnConfig,
    name: &str,
    parent: &str,
    kind: ItemKind,
    out: Option<&Path>,
) -> Result<()> {
    let keys = read_account(config).await?;
    let master = unlock_master(&keys).await?;
    let keyring = keys.unlock_keyring(&master).map_err(user_facing)?;

    let signed = manifest::create_manifest(&master, &keyring, name, parent, kind)
        .map_err(user_facing)?;
    let json = serde_json::to_string_pretty(&signed).context("serializing manifest")?;

    match out {
        Some(path) => {
            tokio::fs::write(path, &json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Signed manifest written to {}", path.display());
            println!("  hash:          {}", signed.signature.manifest_hash);
            println!("  duplicate tag: {}", signed.duplicate_tag);
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_manifest_verify(config: &CairnConfig, file: &Path, owner: bool) -> Result<()> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let signed: SignedManifest =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))?;

    let valid = if owner {
        let keys = read_account(config).await?;
        let public = keys.keyring.public_keys().map_err(user_facing)?;
        manifest::verify_manifest_for(&signed.manifest, &signed.signature, &public)
    } else {
        manifest::verify_manifest(&signed.manifest, &signed.signature)
    };

    if !valid {
        anyhow::bail!("manifest signature INVALID: {}", file.display());
    }
    println!("Manifest OK (ed25519 + ml-dsa-65): {}", signed.signature.manifest_hash);
    Ok(())
}

// ── `cairn device ...` ────────────────────────────────────────────────────────

fn cmd_device_init(config: &CairnConfig) -> Result<()> {
    let store = open_store(&config.device);
    let public_key = device::init_device(store.as_ref()).context("initializing device identity")?;
    println!("{public_key}");
    Ok(())
}

fn cmd_device_show(config: &CairnConfig) -> Result<()> {
    let store = open_store(&config.device);
    let Some(identity) = DeviceIdentity::load(store.as_ref()).context("loading device identity")?
    else {
        println!("No device identity in {} (run `cairn device init`)", store.describe());
        return Ok(());
    };

    println!("Device identity ({})", store.describe());
    println!("  device id:   {}", identity.device_id());
    println!("  name:        {}", identity.device_name());
    println!("  public key:  {}", identity.public_key_hex());
    println!("  fingerprint: {}", identity.fingerprint());
    println!("  created at:  {}", identity.created_at());
    Ok(())
}

fn cmd_device_sign(
    config: &CairnConfig,
    method: &str,
    path: &str,
    timestamp: Option<u64>,
) -> Result<()> {
    let store = open_store(&config.device);
    let identity = DeviceIdentity::init(store.as_ref()).context("loading device identity")?;

    let timestamp = timestamp.unwrap_or_else(device::unix_now);
    let signed = device::RequestSignature {
        device_id: identity.device_id().to_string(),
        signature: identity.sign_request(method, path, timestamp),
        timestamp,
    };
    for (name, value) in signed.headers() {
        println!("{name}: {value}");
    }
    Ok(())
}

fn cmd_device_verify(
    config: &CairnConfig,
    public_key: &str,
    method: &str,
    path: &str,
    timestamp: u64,
    signature: &str,
) -> Result<()> {
    device::verify_request(
        public_key,
        method,
        path,
        timestamp,
        signature,
        device::unix_now(),
        config.device.max_skew_secs,
    )
    .context("request verification failed")?;
    println!("Request signature OK");
    Ok(())
}

fn cmd_device_reset(config: &CairnConfig) -> Result<()> {
    let store = open_store(&config.device);
    store.clear().context("removing device identity")?;
    println!("Device identity removed from {}", store.describe());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "cairn",
            "--log",
            "debug",
            "manifest",
            "create",
            "notes.md",
            "root",
            "--folder",
        ])
        .unwrap();
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Commands::Manifest {
                action: ManifestAction::Create { folder: true, .. }
            }
        ));
    }

    #[test]
    fn test_kdf_params_from_config() {
        let config = CairnConfig::default();
        assert_eq!(kdf_params(&config), KdfParams::default());
    }

    #[test]
    fn test_session_ttl_zero_means_no_expiry() {
        let mut config = CairnConfig::default();
        config.session.master_key_ttl_secs = 0;
        let slot = session_slot(&config);
        slot.unlock(MasterKey::generate());
        assert!(slot.is_unlocked());
    }

    #[test]
    fn test_hex_prefix() {
        assert_eq!(hex_prefix(&[0xde, 0xad]), "dead…");
        assert_eq!(hex_prefix(&[0u8; 32]).len(), 16 + "…".len());
    }

    #[tokio::test]
    async fn test_account_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CairnConfig::default();
        config.account.keys_path = dir.path().join("sub/account.json");

        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        let created = AccountKeys::create(&SecretString::from("pw"), &params).unwrap();
        write_account(&config, &created.keys).await.unwrap();

        let loaded = read_account(&config).await.unwrap();
        let master = loaded.open_master_key(&SecretString::from("pw")).unwrap();
        assert_eq!(master.as_bytes(), created.master.as_bytes());
    }
}
