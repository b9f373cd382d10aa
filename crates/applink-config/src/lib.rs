//! Shared configuration for the appliance bridge.
//!
//! TOML file plus `APPLINK_*` environment overrides, translated into the
//! runtime types the engine consumes: `applink_core::BridgeConfig` and
//! `applink_api::TokenConfig`. The engine itself never reads files -- the
//! composition root loads a [`Config`] and hands the translated pieces in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use applink_api::token::TokenConfig;
use applink_core::{BridgeConfig, DeviceFlags};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// API root, e.g. `https://api.example.com`.
    pub base_url: String,

    /// OAuth client credentials.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Statically configured token material, used only until the first
    /// persisted token exists.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub intervals: Intervals,

    /// Per-device opt-outs, keyed by fabrication number.
    #[serde(default)]
    pub devices: HashMap<String, DeviceOverrides>,

    /// Directory for the persisted token record. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Intervals {
    /// Telemetry polling fallback in seconds; 0 leaves freshness to the
    /// event stream alone.
    pub poll_secs: u64,

    /// Token expiry check cadence in seconds.
    pub token_refresh_check_secs: u64,

    /// Event channel reconnect delay in seconds.
    pub reconnect_delay_secs: u64,

    /// Scheduled event channel recycle in minutes.
    pub forced_reconnect_mins: u64,

    /// Stagger step per accessory in seconds.
    pub stagger_step_secs: u64,

    /// Optimistic-write revert delay in milliseconds.
    pub revert_delay_ms: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll_secs: 0,
            token_refresh_check_secs: 1800,
            reconnect_delay_secs: 60,
            forced_reconnect_mins: 60,
            stagger_step_secs: 1,
            revert_delay_ms: 500,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceOverrides {
    pub disable_stop_action: bool,
    pub disable_target_temperature: bool,
    pub disable_temperature_sensor: bool,
}

// ── Loading ─────────────────────────────────────────────────────────

impl Config {
    /// Load from an explicit file, or from the platform config directory
    /// when none is given, with `APPLINK_*` environment overrides merged
    /// on top (`APPLINK_BASE_URL`, `APPLINK_INTERVALS__POLL_SECS`, ...).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();

        match explicit_path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Some(dirs) = ProjectDirs::from("", "", "applink") {
                    figment = figment.merge(Toml::file(dirs.config_dir().join("config.toml")));
                }
            }
        }

        figment = figment.merge(Env::prefixed("APPLINK_").split("__"));
        Ok(figment.extract()?)
    }

    /// Translate into the engine's runtime configuration.
    pub fn bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let base_url: Url = self.base_url.parse().map_err(|e| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("{e}"),
        })?;

        let mut config = BridgeConfig::new(base_url);
        config.poll_interval = Duration::from_secs(self.intervals.poll_secs);
        config.reconnect_delay = Duration::from_secs(self.intervals.reconnect_delay_secs);
        config.forced_reconnect_interval =
            Duration::from_secs(self.intervals.forced_reconnect_mins * 60);
        config.stagger_step = Duration::from_secs(self.intervals.stagger_step_secs);
        config.revert_delay = Duration::from_millis(self.intervals.revert_delay_ms);
        config.device_flags = self
            .devices
            .iter()
            .map(|(serial, overrides)| {
                (
                    serial.clone(),
                    DeviceFlags {
                        disable_stop_action: overrides.disable_stop_action,
                        disable_target_temperature: overrides.disable_target_temperature,
                        disable_temperature_sensor: overrides.disable_temperature_sensor,
                    },
                )
            })
            .collect();

        Ok(config)
    }

    /// Translate into the token lifecycle configuration.
    pub fn token_config(&self) -> Result<TokenConfig, ConfigError> {
        let token_url: Url = format!(
            "{}/thirdparty/token",
            self.base_url.trim_end_matches('/')
        )
        .parse()
        .map_err(|e| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("{e}"),
        })?;

        let mut config = TokenConfig::new(token_url);
        config.client_id = self.client_id.clone();
        config.client_secret = self.client_secret.clone().map(SecretString::from);
        config.bootstrap_access_token = self.access_token.clone();
        config.bootstrap_refresh_token = self.refresh_token.clone();
        config.refresh_check_interval =
            Duration::from_secs(self.intervals.token_refresh_check_secs);
        Ok(config)
    }

    /// Directory for the persisted token record.
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", "applink")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
