//! Configuration system with embedded defaults and XDG-compliant paths.
//!
//! Boot sequence:
//! 1. Parse the embedded `default_config.toml` (compile-time guarantee it exists).
//! 2. Resolve `~/.config/penkey/config.toml` via the `directories` crate.
//! 3. If the user file doesn't exist, create the directory tree and write the default.
//! 4. Parse the user file (falling back to embedded defaults on any error).
//! 5. Store the resolved `Config` in a `OnceLock` for zero-cost global access.
//!
//! Every other module calls `config::get()` to obtain a `&'static Config`.
//! The file is read exactly once at startup; nothing re-reads it at runtime.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Embedded default configuration — baked into the binary at compile time.
const DEFAULT_CONFIG_STR: &str = include_str!("../default_config.toml");

/// Application-wide config singleton.
static CONFIG: OnceLock<Config> = OnceLock::new();

// ─── Public API ─────────────────────────────────────────────────────────────

/// Initialise the configuration system.  Must be called exactly once at
/// startup, **after** tracing and before any other module calls `get()`.
pub fn init() -> Result<()> {
    let config = load()?;
    CONFIG
        .set(config)
        .map_err(|_| eyre!("Config already initialised"))?;
    Ok(())
}

/// Return a static reference to the loaded configuration.
/// # Panics
/// Panics if `init()` has not been called yet.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init() was not called")
}

// ─── Loading logic ──────────────────────────────────────────────────────────

fn load() -> Result<Config> {
    // 1. Parse compiled-in defaults — the infallible baseline.
    let defaults: RawConfig = toml::from_str(DEFAULT_CONFIG_STR)
        .wrap_err("BUG: failed to parse embedded default_config.toml")?;

    // 2. Resolve user config path.
    let user_path = config_path();
    info!("Config path: {}", user_path.display());

    // 3. Bootstrap on first run.
    ensure_config_file(&user_path)?;

    // 4. Parse user file; fall back to embedded defaults on *any* error.
    let raw = match fs::read_to_string(&user_path) {
        Ok(contents) => match toml::from_str::<RawConfig>(&contents) {
            Ok(parsed) => {
                info!("Loaded user config from {}", user_path.display());
                parsed
            }
            Err(e) => {
                warn!(
                    "Parse error in {}: {e} — falling back to defaults",
                    user_path.display()
                );
                defaults
            }
        },
        Err(e) => {
            warn!(
                "Cannot read {}: {e} — falling back to defaults",
                user_path.display()
            );
            defaults
        }
    };

    Ok(Config::from(raw))
}

/// Resolve the XDG-compliant config file path.
fn config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "penkey")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            // Fallback when $HOME is unset (common for system services).
            PathBuf::from("/etc/penkey/config.toml")
        })
}

/// Create the config directory tree and write the default file if absent.
fn ensure_config_file(path: &PathBuf) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_STR)
        .wrap_err_with(|| format!("Failed to write default config to {}", path.display()))?;
    info!("Created default config at {}", path.display());
    Ok(())
}

// ─── Raw TOML structures (serde targets) ────────────────────────────────────
//
// Each struct carries `#[serde(default)]` so that missing keys or entire
// sections gracefully fill in from the compiled defaults.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawConfig {
    device: RawDevice,
    pairing: RawPairing,
    radio: RawRadio,
    input: RawInput,
    advertising: RawAdvertising,
}

// ── Device identity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawDevice {
    name: String,
    manufacturer: String,
    model: String,
    vendor_id: u32,
    product_id: u32,
    version: u32,
}

impl Default for RawDevice {
    fn default() -> Self {
        Self {
            name: "Penkey Keyboard".into(),
            manufacturer: "Penkey".into(),
            model: "Penkey BLE Keyboard".into(),
            vendor_id: 0x1209,
            product_id: 0x0001,
            version: 0x0100,
        }
    }
}

// ── Pairing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawPairing {
    mode: String,
    pin: String,
    passkey: u32,
}

impl Default for RawPairing {
    fn default() -> Self {
        Self {
            mode: "no-passkey".into(),
            pin: "0000".into(),
            passkey: 0,
        }
    }
}

// ── Radio ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawRadio {
    mode: String,
}

impl Default for RawRadio {
    fn default() -> Self {
        Self {
            mode: "dual".into(),
        }
    }
}

// ── Input pipeline ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawInput {
    fifo_path: String,
    key_hold_ms: u64,
    key_gap_ms: u64,
}

impl Default for RawInput {
    fn default() -> Self {
        Self {
            fifo_path: "/run/penkey.fifo".into(),
            key_hold_ms: 12,
            key_gap_ms: 8,
        }
    }
}

// ── Advertising recovery ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawAdvertising {
    max_attempts: u32,
    initial_backoff_secs: u64,
}

impl Default for RawAdvertising {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_secs: 2,
        }
    }
}

// ─── Resolved runtime config ────────────────────────────────────────────────
//
// These are the structs the rest of the daemon interacts with.  All values
// are validated and clamped — no further parsing past this point.

/// Fully resolved, runtime-ready configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    pub pairing: PairingConfig,
    pub radio: RadioMode,
    pub input: InputConfig,
    pub advertising: RetryConfig,
}

/// Identity presented to hosts via the adapter alias, the advertisement and
/// the Device-Information service.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
}

/// How the pairing agent answers PIN/passkey requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    /// Reject PIN/passkey requests; rely on auto-accepted confirmations.
    NoPasskey,
    /// Answer PIN/passkey requests with the configured fixed values.
    FixedPin,
}

#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub mode: PairingMode,
    pub pin: String,
    pub passkey: u32,
}

/// Adapter radio mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// BR/EDR + LE; the adapter is also made classic-discoverable.
    Dual,
    /// LE only; discoverability comes from the advertisement flags.
    LeOnly,
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub fifo_path: PathBuf,
    pub key_hold_ms: u64,
    pub key_gap_ms: u64,
}

/// Bounded-backoff parameters shared by GATT and advertisement registration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
}

// ─── Raw → Resolved conversion ─────────────────────────────────────────────

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        Self {
            device: DeviceConfig {
                name: raw.device.name,
                manufacturer: raw.device.manufacturer,
                model: raw.device.model,
                vendor_id: (raw.device.vendor_id & 0xFFFF) as u16,
                product_id: (raw.device.product_id & 0xFFFF) as u16,
                version: (raw.device.version & 0xFFFF) as u16,
            },
            pairing: PairingConfig {
                mode: parse_pairing_mode(&raw.pairing.mode),
                pin: raw.pairing.pin,
                // BLE passkeys are six decimal digits.
                passkey: raw.pairing.passkey % 1_000_000,
            },
            radio: parse_radio_mode(&raw.radio.mode),
            input: InputConfig {
                fifo_path: PathBuf::from(raw.input.fifo_path),
                key_hold_ms: raw.input.key_hold_ms.clamp(1, 500),
                key_gap_ms: raw.input.key_gap_ms.clamp(1, 500),
            },
            advertising: RetryConfig {
                max_attempts: raw.advertising.max_attempts.clamp(1, 60),
                initial_backoff_secs: raw.advertising.initial_backoff_secs.clamp(1, 60),
            },
        }
    }
}

fn parse_pairing_mode(s: &str) -> PairingMode {
    match s {
        "no-passkey" => PairingMode::NoPasskey,
        "fixed-pin" => PairingMode::FixedPin,
        other => {
            warn!("Unknown pairing mode \"{other}\" in config — using no-passkey");
            PairingMode::NoPasskey
        }
    }
}

fn parse_radio_mode(s: &str) -> RadioMode {
    match s {
        "dual" => RadioMode::Dual,
        "le-only" => RadioMode::LeOnly,
        other => {
            warn!("Unknown radio mode \"{other}\" in config — using dual");
            RadioMode::Dual
        }
    }
}
