// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Sources, later ones winning: built-in defaults, `crewchat.toml` (or an
//! explicit file), then `CREWCHAT_` environment variables with `__`
//! separating nested keys (`CREWCHAT_STORAGE__BACKEND=flat_file`).
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::storage::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "crewchat.toml";
pub const ENV_PREFIX: &str = "CREWCHAT_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    pub storage: StorageSettings,
    pub retry: RetrySettings,
    pub chat: ChatSettings,
    pub staffing: StaffingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    FlatFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Data directory of the flat-file backend
    pub path: PathBuf,
    /// Upper bound on every store call
    pub timeout_ms: u64,
}

/// Backoff for store reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Maximum message length in characters
    pub max_message_length: usize,
    /// Outbound queue size of each connection
    pub connection_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaffingSettings {
    /// Maximum images attached to one application
    pub max_evidence_items: usize,
    /// Fee added on top of the crew subtotal, as a fraction
    pub service_fee_rate: f64,
    /// Re-reads allowed after a lost compare-and-set
    pub cas_retry_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            log_level: "info".to_string(),
            storage: StorageSettings::default(),
            retry: RetrySettings::default(),
            chat: ChatSettings::default(),
            staffing: StaffingSettings::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("data"),
            timeout_ms: 5_000,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_500,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: 2_000,
            connection_buffer: 64,
        }
    }
}

impl Default for StaffingSettings {
    fn default() -> Self {
        Self {
            max_evidence_items: 5,
            service_fee_rate: 0.13,
            cas_retry_limit: 3,
        }
    }
}

impl StorageSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

impl Settings {
    /// Load from `crewchat.toml` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load from an explicit file and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values no deployment could mean
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!("invalid log level {:?}", self.log_level);
        }
        if self.storage.timeout_ms == 0 {
            bail!("storage.timeout_ms must be positive");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.chat.max_message_length == 0 {
            bail!("chat.max_message_length must be positive");
        }
        if self.chat.connection_buffer == 0 {
            bail!("chat.connection_buffer must be positive");
        }
        if self.staffing.max_evidence_items == 0 {
            bail!("staffing.max_evidence_items must be positive");
        }
        if !(0.0..=1.0).contains(&self.staffing.service_fee_rate) {
            bail!("staffing.service_fee_rate must be between 0 and 1");
        }
        Ok(())
    }
}
