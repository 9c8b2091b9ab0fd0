//! Store configuration, persisted as JSON next to the data

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_NAME: &str = "bitemporal.json";

/// Write-ahead log settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// fsync every commit before publishing it
    pub sync_on_commit: bool,
    /// zstd-compress frame bodies
    pub compress: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compress: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one log file per entity type
    pub data_dir: PathBuf,
    pub wal: WalConfig,
    /// How long a transaction waits for an entity lock before failing
    /// with a conflict
    pub lock_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            wal: WalConfig::default(),
            lock_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Read a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::Configuration(format!("read {}: {err}", path.display())))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|err| Error::Configuration(format!("parse {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `bitemporal.json` from `base_dir`, writing the defaults there
    /// on first use. A relative `data_dir` is resolved against `base_dir`.
    pub fn load_or_init(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| Error::Configuration(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);

        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            let default = Config::default();
            let payload = serde_json::to_string_pretty(&default)?;
            fs::write(&config_path, payload)
                .map_err(|err| Error::Configuration(format!("write config: {err}")))?;
            default
        };

        if config.data_dir.is_relative() {
            config.data_dir = base_dir.join(&config.data_dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::Configuration(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Log file backing one entity type
    pub fn history_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.wal"))
    }
}
