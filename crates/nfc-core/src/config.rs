//! Configuration for the host-side controller layer.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $NFC_HOST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/nfc-host/config.toml
//!   3. ~/.config/nfc-host/config.toml
//!
//! These are the layer's own tuning knobs (exchange timeouts, presence
//! interval, queue depth). Platform policy such as the screen-state
//! source is supplied by the embedding system, not loaded here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tech::Technology;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub timeouts: TimeoutConfig,
    pub presence: PresenceConfig,
    pub events: EventConfig,
    /// Device-test-application conformance mode.
    pub dta_mode: bool,
}

/// Per-technology transceive timeouts, milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub nfc_a_ms: u64,
    pub nfc_b_ms: u64,
    pub iso_dep_ms: u64,
    pub nfc_f_ms: u64,
    pub nfc_v_ms: u64,
    pub mifare_ms: u64,
    /// Fallback for technologies without a dedicated knob.
    pub default_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Default delay between background presence probes.
    pub check_interval_ms: u64,
    /// Re-activation attempts before `reconnect` gives up.
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Bounded depth of the notifier queue between the hardware event
    /// pump and the listener dispatch task.
    pub queue_depth: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            presence: PresenceConfig::default(),
            events: EventConfig::default(),
            dta_mode: false,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            nfc_a_ms: 500,
            nfc_b_ms: 500,
            iso_dep_ms: 618,
            nfc_f_ms: 255,
            nfc_v_ms: 1000,
            mifare_ms: 618,
            default_ms: 1000,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { check_interval_ms: 125, reconnect_attempts: 2 }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

impl TimeoutConfig {
    pub fn for_technology(&self, tech: Technology) -> u64 {
        match tech {
            Technology::NfcA => self.nfc_a_ms,
            Technology::NfcB => self.nfc_b_ms,
            Technology::IsoDep => self.iso_dep_ms,
            Technology::NfcF => self.nfc_f_ms,
            Technology::NfcV => self.nfc_v_ms,
            Technology::MifareClassic | Technology::MifareUltralight => self.mifare_ms,
            _ => self.default_ms,
        }
    }
}

/// Mutable runtime timeout table seeded from config and restored by
/// `reset_timeouts`.
#[derive(Debug, Clone)]
pub struct Timeouts {
    defaults: TimeoutConfig,
    overrides: std::collections::HashMap<Technology, u64>,
}

impl Timeouts {
    pub fn new(defaults: TimeoutConfig) -> Self {
        Self { defaults, overrides: std::collections::HashMap::new() }
    }

    pub fn get(&self, tech: Technology) -> u64 {
        self.overrides.get(&tech).copied().unwrap_or_else(|| self.defaults.for_technology(tech))
    }

    pub fn set(&mut self, tech: Technology, ms: u64) {
        self.overrides.insert(tech, ms);
    }

    pub fn reset(&mut self) {
        self.overrides.clear();
    }

    /// Fallback timeout for exchanges without a technology context.
    pub fn default_ms(&self) -> u64 {
        self.defaults.default_ms
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("nfc-host")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HostConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HostConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("NFC_HOST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HostConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply NFC_HOST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NFC_HOST_PRESENCE__CHECK_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.presence.check_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("NFC_HOST_EVENTS__QUEUE_DEPTH") {
            if let Ok(depth) = v.parse() {
                self.events.queue_depth = depth;
            }
        }
        if let Ok(v) = std::env::var("NFC_HOST_DTA_MODE") {
            self.dta_mode = v == "true" || v == "1";
        }
    }
}
