//! Application configuration management.
//!
//! Stored at `~/.config/agendamed/config.json`. Every field is optional in the
//! file; `AGENDAMED_DATA_DIR` and `AGENDAMED_CACHE_TTL_MINUTES` override it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "agendamed";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_DATA_DIR: &str = "AGENDAMED_DATA_DIR";
const ENV_CACHE_TTL: &str = "AGENDAMED_CACHE_TTL_MINUTES";

const DEFAULT_BACKUP_RETENTION: usize = 5;

fn default_backup_retention() -> usize {
    DEFAULT_BACKUP_RETENTION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// TTL for cached collection writes; unset means no expiry
    #[serde(default)]
    pub cache_ttl_minutes: Option<i64>,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            backup_dir: None,
            cache_ttl_minutes: None,
            backup_retention: DEFAULT_BACKUP_RETENTION,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL) {
            let minutes = ttl
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{} must be a whole number of minutes", ENV_CACHE_TTL))?;
            self.cache_ttl_minutes = Some(minutes);
        }
        Ok(())
    }

    /// Directory holding one JSON document per storage key.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        match self.backup_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(self.data_dir()?.join("backups")),
        }
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_minutes
            .filter(|m| *m > 0)
            .map(Duration::minutes)
    }
}
