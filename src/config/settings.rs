//! Application settings loaded from `config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine. The path
//! can be overridden with `REFERRAL_LEDGER_CONFIG`.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

const CONFIG_PATH_ENV: &str = "REFERRAL_LEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP server settings
    pub server: ServerSettings,
    /// Reward policy
    pub rewards: RewardSettings,
    /// Referral code generation
    pub referral_codes: CodeSettings,
    /// API response settings
    pub api: ApiSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the listener binds to
    pub bind_address: String,
    /// Base URL a referral code is appended to when building share links
    pub share_base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            share_base_url: "https://example.com/signup".to_string(),
        }
    }
}

/// Reward policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Amount credited to each party of a completed referral, in minor units
    pub referral_reward_amount: i64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            referral_reward_amount: 100,
        }
    }
}

/// Referral code generation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeSettings {
    /// Number of characters in a generated code
    pub length: usize,
    /// Attempts before giving up on collisions
    pub max_attempts: u32,
}

impl Default for CodeSettings {
    fn default() -> Self {
        Self {
            length: 6,
            max_attempts: 5,
        }
    }
}

/// API response settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Page size when the caller does not ask for one
    pub default_per_page: u64,
    /// Largest page size a caller may request
    pub max_per_page: u64,
    /// Seconds a last-known read stays usable as a fallback
    pub cache_ttl_secs: u64,
    /// Most callers whose reads are kept
    pub cache_max_owners: u64,
    /// Most distinct views kept per caller
    pub cache_entries_per_owner: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            max_per_page: 100,
            cache_ttl_secs: 300,
            cache_max_owners: 10_000,
            cache_entries_per_owner: 16,
        }
    }
}

impl Settings {
    /// Rejects settings that would break ledger or registry invariants.
    pub fn validate(&self) -> Result<()> {
        if self.rewards.referral_reward_amount <= 0 {
            return Err(Error::Config {
                message: format!(
                    "rewards.referral_reward_amount must be positive, got {}",
                    self.rewards.referral_reward_amount
                ),
            });
        }
        if self.referral_codes.length < 4 {
            return Err(Error::Config {
                message: format!(
                    "referral_codes.length must be at least 4, got {}",
                    self.referral_codes.length
                ),
            });
        }
        if self.referral_codes.max_attempts == 0 {
            return Err(Error::Config {
                message: "referral_codes.max_attempts must be at least 1".to_string(),
            });
        }
        if self.api.max_per_page == 0 || self.api.default_per_page == 0 {
            return Err(Error::Config {
                message: "api page sizes must be at least 1".to_string(),
            });
        }
        if self.api.cache_max_owners == 0 || self.api.cache_entries_per_owner == 0 {
            return Err(Error::Config {
                message: "api cache capacities must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses and validates settings from a TOML string.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a TOML file.
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails validation
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

/// Loads settings from `REFERRAL_LEDGER_CONFIG` or `./config.toml`, using defaults
/// when the file does not exist.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        load_settings(&path)
    } else {
        info!(path = %path, "No config file found, using default settings");
        let settings = Settings::default();
        settings.validate()?;
        Ok(settings)
    }
}
